//! Objects and sub-objects: the indexed, typed nodes of a device's object dictionary.

use std::collections::BTreeMap;
use std::fmt;

use crate::abort::AbortCode;
use super::data_type::DataType;
use super::value::Value;

/// Access rights for a sub-object, as seen through SDO and PDO indications.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
	/// Readable only.
	ReadOnly,
	/// Writable only.
	WriteOnly,
	/// Readable and writable.
	ReadWrite,
	/// Readable; writes are always rejected, even by local application code.
	Const,
}

impl Access {
	/// Whether an SDO upload (or PDO transmit mapping) may read this sub-object.
	pub const fn readable(self) -> bool {
		matches!(self, Access::ReadOnly | Access::ReadWrite | Access::Const)
	}

	/// Whether an SDO download (or PDO receive mapping) may write this sub-object.
	pub const fn writable(self) -> bool {
		matches!(self, Access::WriteOnly | Access::ReadWrite)
	}
}

/// The object code distinguishing how an object's sub-objects are structured.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ObjectCode {
	/// A single value at sub-index 0.
	Var,
	/// Sub-index 0 holds the highest populated sub-index; 1.. hold same-typed elements.
	Array,
	/// Sub-index 0 holds the highest populated sub-index; 1.. hold differently-typed fields.
	Record,
	/// Definition of a structure type (used by device description tooling, not at runtime).
	DefStruct,
	/// Definition of a simple type.
	DefType,
	/// Opaque byte blob, read/written as one unit.
	Domain,
}

/// A closure invoked when an SDO (or PDO receive) download writes to a sub-object.
///
/// Takes the sub-object being written (so the hook can run the default clamping logic via
/// [`SubObject::write_value`] before or after its own side effects) and the raw wire bytes.
pub type DownloadIndication = Box<dyn FnMut(&mut SubObject, &[u8]) -> Result<(), AbortCode> + Send>;

/// A closure invoked when an SDO (or PDO transmit) upload reads a sub-object's value.
///
/// Appends the encoded value to `out`.
pub type UploadIndication = Box<dyn FnMut(&SubObject, &mut Vec<u8>) -> Result<(), AbortCode> + Send>;

/// One addressable leaf in the object dictionary tree.
pub struct SubObject {
	subidx: u8,
	data_type: DataType,
	access: Access,
	pdo_mappable: bool,
	limits: Option<(Value, Value)>,
	value: Value,
	download_hook: Option<DownloadIndication>,
	upload_hook: Option<UploadIndication>,
}

impl fmt::Debug for SubObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubObject")
			.field("subidx", &self.subidx)
			.field("data_type", &self.data_type)
			.field("access", &self.access)
			.field("pdo_mappable", &self.pdo_mappable)
			.field("value", &self.value)
			.finish_non_exhaustive()
	}
}

impl SubObject {
	/// Create a new sub-object holding `initial` with no range limits and no custom hooks.
	pub fn new(subidx: u8, access: Access, pdo_mappable: bool, initial: Value) -> Self {
		Self {
			subidx,
			data_type: initial.data_type(),
			access,
			pdo_mappable,
			limits: None,
			value: initial,
			download_hook: None,
			upload_hook: None,
		}
	}

	/// Restrict downloads through [`Self::write_value`] to the inclusive range `[min, max]`.
	///
	/// `min` and `max` must carry the same [`DataType`] as this sub-object's value; violating
	/// this is a logic error caught by `debug_assert!`, not a recoverable `Result`, since
	/// limits are fixed at device-construction time.
	pub fn with_limits(mut self, min: Value, max: Value) -> Self {
		debug_assert!(min.data_type() == self.data_type);
		debug_assert!(max.data_type() == self.data_type);
		self.limits = Some((min, max));
		self
	}

	/// Install a custom download indication, replacing the default write-with-clamping
	/// behavior.
	pub fn with_download_hook(mut self, hook: DownloadIndication) -> Self {
		self.download_hook = Some(hook);
		self
	}

	/// Install a custom upload indication, replacing the default encode-current-value
	/// behavior.
	pub fn with_upload_hook(mut self, hook: UploadIndication) -> Self {
		self.upload_hook = Some(hook);
		self
	}

	/// This sub-object's index within its parent object.
	pub fn subidx(&self) -> u8 {
		self.subidx
	}

	/// The data type of the value this sub-object stores.
	pub fn data_type(&self) -> DataType {
		self.data_type
	}

	/// The access rights of this sub-object.
	pub fn access(&self) -> Access {
		self.access
	}

	/// Whether this sub-object may appear in a PDO mapping.
	pub fn pdo_mappable(&self) -> bool {
		self.pdo_mappable
	}

	/// The current value.
	pub fn value(&self) -> &Value {
		&self.value
	}

	/// Read the current value, encoded to wire bytes, failing if the sub-object is not
	/// readable.
	pub fn read_value(&self) -> Result<Vec<u8>, AbortCode> {
		if !self.access.readable() {
			return Err(AbortCode::ReadFromWriteOnlyObject);
		}
		let mut out = Vec::new();
		self.value.encode(&mut out);
		Ok(out)
	}

	/// Decode `bytes` as this sub-object's data type and store it, checking access rights and
	/// the optional `[min, max]` range.
	///
	/// This is the default behavior a [`DownloadIndication`] hook may call into; a custom hook
	/// may instead bypass it entirely.
	pub fn write_value(&mut self, bytes: &[u8]) -> Result<(), AbortCode> {
		if self.access == Access::Const {
			return Err(AbortCode::WriteToReadOnlyObject);
		}
		if !self.access.writable() {
			return Err(AbortCode::WriteToReadOnlyObject);
		}
		let value = Value::decode(self.data_type, bytes).map_err(|_| AbortCode::LengthMismatch)?;
		if let Some((min, max)) = &self.limits {
			if !value_in_range(&value, min, max) {
				return Err(AbortCode::ObjectValueInvalid);
			}
		}
		self.value = value;
		Ok(())
	}

	/// Run this sub-object's download indication (the custom hook if installed, otherwise
	/// [`Self::write_value`]).
	pub fn download_indication(&mut self, bytes: &[u8]) -> Result<(), AbortCode> {
		match self.download_hook.take() {
			Some(mut hook) => {
				let result = hook(self, bytes);
				self.download_hook = Some(hook);
				result
			}
			None => self.write_value(bytes),
		}
	}

	/// Run this sub-object's upload indication (the custom hook if installed, otherwise
	/// [`Self::read_value`]), appending encoded bytes to `out`.
	pub fn upload_indication(&mut self, out: &mut Vec<u8>) -> Result<(), AbortCode> {
		match self.upload_hook.take() {
			Some(mut hook) => {
				let result = hook(self, out);
				self.upload_hook = Some(hook);
				result
			}
			None => {
				out.extend_from_slice(&self.read_value()?);
				Ok(())
			}
		}
	}
}

fn value_in_range(value: &Value, min: &Value, max: &Value) -> bool {
	use Value::*;
	match (value, min, max) {
		(Integer8(v), Integer8(lo), Integer8(hi)) => (lo..=hi).contains(&v),
		(Integer16(v), Integer16(lo), Integer16(hi)) => (lo..=hi).contains(&v),
		(Integer24(v), Integer24(lo), Integer24(hi)) => (lo..=hi).contains(&v),
		(Integer32(v), Integer32(lo), Integer32(hi)) => (lo..=hi).contains(&v),
		(Integer40(v), Integer40(lo), Integer40(hi)) => (lo..=hi).contains(&v),
		(Integer48(v), Integer48(lo), Integer48(hi)) => (lo..=hi).contains(&v),
		(Integer56(v), Integer56(lo), Integer56(hi)) => (lo..=hi).contains(&v),
		(Integer64(v), Integer64(lo), Integer64(hi)) => (lo..=hi).contains(&v),
		(Unsigned8(v), Unsigned8(lo), Unsigned8(hi)) => (lo..=hi).contains(&v),
		(Unsigned16(v), Unsigned16(lo), Unsigned16(hi)) => (lo..=hi).contains(&v),
		(Unsigned24(v), Unsigned24(lo), Unsigned24(hi)) => (lo..=hi).contains(&v),
		(Unsigned32(v), Unsigned32(lo), Unsigned32(hi)) => (lo..=hi).contains(&v),
		(Unsigned40(v), Unsigned40(lo), Unsigned40(hi)) => (lo..=hi).contains(&v),
		(Unsigned48(v), Unsigned48(lo), Unsigned48(hi)) => (lo..=hi).contains(&v),
		(Unsigned56(v), Unsigned56(lo), Unsigned56(hi)) => (lo..=hi).contains(&v),
		(Unsigned64(v), Unsigned64(lo), Unsigned64(hi)) => (lo..=hi).contains(&v),
		(Real32(v), Real32(lo), Real32(hi)) => v >= lo && v <= hi,
		(Real64(v), Real64(lo), Real64(hi)) => v >= lo && v <= hi,
		// Types without a meaningful total order (strings, time stamps, blobs) never get
		// limits installed; treat any mismatch as in-range rather than panicking.
		_ => true,
	}
}

/// An indexed node in the object dictionary, holding one or more [`SubObject`]s.
#[derive(Debug)]
pub struct Object {
	idx: u16,
	code: ObjectCode,
	name: Option<String>,
	subs: BTreeMap<u8, SubObject>,
}

impl Object {
	/// Create an empty object at `idx`.
	pub fn new(idx: u16, code: ObjectCode) -> Self {
		Self { idx, code, name: None, subs: BTreeMap::new() }
	}

	/// Attach a human-readable name (as exposed by CiA-301 object-name queries).
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Insert a sub-object, replacing any previous one at the same sub-index.
	pub fn with_sub(mut self, sub: SubObject) -> Self {
		self.subs.insert(sub.subidx(), sub);
		self
	}

	/// This object's index.
	pub fn idx(&self) -> u16 {
		self.idx
	}

	/// This object's code.
	pub fn code(&self) -> ObjectCode {
		self.code
	}

	/// This object's name, if set.
	pub fn name(&self) -> Option<&str> {
		self.name.as_deref()
	}

	/// Look up a sub-object by index.
	pub fn sub(&self, subidx: u8) -> Option<&SubObject> {
		self.subs.get(&subidx)
	}

	/// Look up a sub-object mutably by index.
	pub fn sub_mut(&mut self, subidx: u8) -> Option<&mut SubObject> {
		self.subs.get_mut(&subidx)
	}

	/// Iterate over all sub-objects in ascending sub-index order.
	pub fn subs(&self) -> impl Iterator<Item = &SubObject> {
		self.subs.values()
	}

	/// For [`ObjectCode::Array`] and [`ObjectCode::Record`] objects, the highest populated
	/// sub-index, read from sub-index 0. Returns `None` if sub-index 0 is absent or not an
	/// unsigned 8-bit value.
	pub fn highest_subindex(&self) -> Option<u8> {
		match self.subs.get(&0)?.value() {
			Value::Unsigned8(n) => Some(*n),
			_ => None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	fn var(access: Access, initial: Value) -> SubObject {
		SubObject::new(0, access, false, initial)
	}

	#[test]
	fn read_only_rejects_write() {
		let mut sub = var(Access::ReadOnly, Value::Unsigned32(1));
		let_assert!(Err(AbortCode::WriteToReadOnlyObject) = sub.write_value(&4u32.to_le_bytes()));
	}

	#[test]
	fn write_only_rejects_read() {
		let sub = var(Access::WriteOnly, Value::Unsigned32(1));
		let_assert!(Err(AbortCode::ReadFromWriteOnlyObject) = sub.read_value());
	}

	#[test]
	fn const_rejects_write() {
		let mut sub = var(Access::Const, Value::Unsigned32(1));
		let_assert!(Err(AbortCode::WriteToReadOnlyObject) = sub.write_value(&4u32.to_le_bytes()));
	}

	#[test]
	fn read_write_round_trips() {
		let mut sub = var(Access::ReadWrite, Value::Unsigned32(0));
		sub.write_value(&0xDEADBEEFu32.to_le_bytes()).unwrap();
		assert!(sub.value() == &Value::Unsigned32(0xDEADBEEF));
		assert!(sub.read_value().unwrap() == 0xDEADBEEFu32.to_le_bytes());
	}

	#[test]
	fn write_outside_limits_is_rejected() {
		let mut sub = var(Access::ReadWrite, Value::Unsigned32(10))
			.with_limits(Value::Unsigned32(0), Value::Unsigned32(100));
		let_assert!(Err(AbortCode::ObjectValueInvalid) = sub.write_value(&200u32.to_le_bytes()));
		sub.write_value(&50u32.to_le_bytes()).unwrap();
		assert!(sub.value() == &Value::Unsigned32(50));
	}

	#[test]
	fn custom_download_hook_runs_instead_of_default() {
		let mut sub = var(Access::ReadWrite, Value::Unsigned8(0))
			.with_download_hook(Box::new(|sub, bytes| {
				sub.write_value(bytes)?;
				if let Value::Unsigned8(v) = &mut sub.value {
					*v += 1;
				}
				Ok(())
			}));
		sub.download_indication(&[5u8]).unwrap();
		assert!(sub.value() == &Value::Unsigned8(6));
	}

	#[test]
	fn object_tracks_highest_subindex() {
		let obj = Object::new(0x1003, ObjectCode::Array)
			.with_sub(SubObject::new(0, Access::ReadOnly, false, Value::Unsigned8(2)))
			.with_sub(SubObject::new(1, Access::ReadOnly, false, Value::Unsigned32(0)))
			.with_sub(SubObject::new(2, Access::ReadOnly, false, Value::Unsigned32(0)));
		assert!(obj.highest_subindex() == Some(2));
	}

	#[test]
	fn subs_iterate_in_ascending_order() {
		let obj = Object::new(0x2000, ObjectCode::Record)
			.with_sub(SubObject::new(2, Access::ReadOnly, false, Value::Unsigned8(0)))
			.with_sub(SubObject::new(1, Access::ReadOnly, false, Value::Unsigned8(0)));
		let indices: Vec<u8> = obj.subs().map(|s| s.subidx()).collect();
		assert!(indices == [1, 2]);
	}
}
