//! The device: a node-id plus its full object dictionary.

use std::collections::BTreeMap;

use crate::bittiming::SupportedBitRates;
use super::error::DictionaryError;
use super::object::Object;

/// Sentinel node-id meaning "not yet assigned"; SDO, PDO and heartbeat services refuse to
/// start against a device configured with it.
pub const UNASSIGNED_NODE_ID: u8 = 255;

/// A bitset of dummy-mappable basic data types (objects 0002h-0007h when used as PDO mapping
/// placeholders with no backing storage).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DummyMappingMask(u32);

impl DummyMappingMask {
	/// An empty mask: no basic data type may be used as a dummy mapping entry.
	pub const fn empty() -> Self {
		Self(0)
	}

	/// Mark the type identified by `data_type_code` as usable as a dummy entry.
	pub const fn with(mut self, data_type_code: u16) -> Self {
		self.0 |= 1u32 << data_type_code;
		self
	}

	/// True if `data_type_code` is marked as usable as a dummy entry.
	pub const fn allows(self, data_type_code: u16) -> bool {
		self.0 & (1u32 << data_type_code) != 0
	}
}

/// A CANopen node: its identity, its object dictionary, and the bit rates and dummy mappings
/// it supports.
///
/// `Device` owns every [`Object`] and, transitively, every sub-object's value. Dropping a
/// `Device` drops them all in one pass; there is no manual teardown step.
#[derive(Debug)]
pub struct Device {
	node_id: u8,
	objects: BTreeMap<u16, Object>,
	vendor_id: u32,
	product_code: u32,
	revision: u32,
	supported_bit_rates: SupportedBitRates,
	dummy_mapping: DummyMappingMask,
}

impl Device {
	/// Create a device with `node_id` and no objects.
	///
	/// `node_id` must be in `1..=127`, or [`UNASSIGNED_NODE_ID`] for a device awaiting
	/// configuration.
	pub fn new(node_id: u8, vendor_id: u32, product_code: u32, revision: u32) -> Result<Self, DictionaryError> {
		if node_id == 0 || (node_id > 127 && node_id != UNASSIGNED_NODE_ID) {
			return Err(DictionaryError::InvalidNodeId(node_id));
		}
		Ok(Self {
			node_id,
			objects: BTreeMap::new(),
			vendor_id,
			product_code,
			revision,
			supported_bit_rates: SupportedBitRates::empty(),
			dummy_mapping: DummyMappingMask::empty(),
		})
	}

	/// Declare the bit rates this device supports.
	pub fn with_supported_bit_rates(mut self, rates: SupportedBitRates) -> Self {
		self.supported_bit_rates = rates;
		self
	}

	/// Declare which basic data types may be used as dummy PDO mapping entries.
	pub fn with_dummy_mapping(mut self, mask: DummyMappingMask) -> Self {
		self.dummy_mapping = mask;
		self
	}

	/// Insert an object into the dictionary.
	pub fn with_object(mut self, object: Object) -> Result<Self, DictionaryError> {
		self.insert_object(object)?;
		Ok(self)
	}

	/// Insert an object into the dictionary, failing if its index is already taken.
	pub fn insert_object(&mut self, object: Object) -> Result<(), DictionaryError> {
		let idx = object.idx();
		if self.objects.contains_key(&idx) {
			return Err(DictionaryError::DuplicateObject { idx });
		}
		self.objects.insert(idx, object);
		Ok(())
	}

	/// This device's node-id, or [`UNASSIGNED_NODE_ID`] if not yet configured.
	pub fn node_id(&self) -> u8 {
		self.node_id
	}

	/// True if this device has a valid node-id and may start its SDO/PDO/heartbeat services.
	pub fn is_configured(&self) -> bool {
		self.node_id != UNASSIGNED_NODE_ID
	}

	/// Assign a node-id after construction (e.g. from a LSS or boot-time configuration step).
	pub fn set_node_id(&mut self, node_id: u8) -> Result<(), DictionaryError> {
		if node_id == 0 || (node_id > 127 && node_id != UNASSIGNED_NODE_ID) {
			return Err(DictionaryError::InvalidNodeId(node_id));
		}
		self.node_id = node_id;
		Ok(())
	}

	/// The vendor-id reported in object 1018h:01.
	pub fn vendor_id(&self) -> u32 {
		self.vendor_id
	}

	/// The product code reported in object 1018h:02.
	pub fn product_code(&self) -> u32 {
		self.product_code
	}

	/// The revision number reported in object 1018h:03.
	pub fn revision(&self) -> u32 {
		self.revision
	}

	/// The bit rates this device supports.
	pub fn supported_bit_rates(&self) -> SupportedBitRates {
		self.supported_bit_rates
	}

	/// The dummy mapping mask this device supports.
	pub fn dummy_mapping(&self) -> DummyMappingMask {
		self.dummy_mapping
	}

	/// Look up an object by index.
	pub fn object(&self, idx: u16) -> Option<&Object> {
		self.objects.get(&idx)
	}

	/// Look up an object mutably by index.
	pub fn object_mut(&mut self, idx: u16) -> Option<&mut Object> {
		self.objects.get_mut(&idx)
	}

	/// Iterate over all objects in ascending index order.
	pub fn objects(&self) -> impl Iterator<Item = &Object> {
		self.objects.values()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::bittiming::BitRate;
	use crate::dict::object::{Access, ObjectCode, SubObject};
	use crate::dict::value::Value;
	use assert2::{assert, let_assert};

	#[test]
	fn rejects_invalid_node_id() {
		let_assert!(Err(DictionaryError::InvalidNodeId(0)) = Device::new(0, 0, 0, 0));
		let_assert!(Err(DictionaryError::InvalidNodeId(128)) = Device::new(128, 0, 0, 0));
	}

	#[test]
	fn unassigned_sentinel_is_accepted_and_reports_unconfigured() {
		let device = Device::new(UNASSIGNED_NODE_ID, 0, 0, 0).unwrap();
		assert!(!device.is_configured());
	}

	#[test]
	fn valid_node_id_reports_configured() {
		let device = Device::new(1, 0, 0, 0).unwrap();
		assert!(device.is_configured());
	}

	#[test]
	fn rejects_duplicate_object_index() {
		let device = Device::new(1, 0, 0, 0).unwrap();
		let obj = |idx| Object::new(idx, ObjectCode::Var).with_sub(SubObject::new(0, Access::ReadOnly, false, Value::Unsigned8(0)));
		let device = device.with_object(obj(0x2000)).unwrap();
		let_assert!(Err(DictionaryError::DuplicateObject { idx: 0x2000 }) = device.with_object(obj(0x2000)));
	}

	#[test]
	fn tracks_supported_bit_rates() {
		let device = Device::new(1, 0, 0, 0).unwrap()
			.with_supported_bit_rates(SupportedBitRates::empty().with(BitRate::Kbit500));
		assert!(device.supported_bit_rates().supports(BitRate::Kbit500));
		assert!(!device.supported_bit_rates().supports(BitRate::Kbit125));
	}

	#[test]
	fn drops_all_objects_on_drop() {
		let device = Device::new(1, 0, 0, 0).unwrap()
			.with_object(Object::new(0x2000, ObjectCode::Var)
				.with_sub(SubObject::new(0, Access::ReadWrite, false, Value::VisibleString("x".into()))))
			.unwrap();
		drop(device);
	}
}
