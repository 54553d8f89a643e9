use can_socket::tokio::CanSocket;
use canopen_socket::CanOpenSocket;
use std::time::Duration;

#[derive(clap::Parser)]
struct Options {
	/// The CAN interface to use.
	interface: String,

	/// The node to read from.
	#[clap(value_parser(parse_number::<u8>))]
	node_id: u8,

	/// The object index to read.
	#[clap(value_parser(parse_number::<u16>))]
	index: u16,

	/// The sub-index to read.
	#[clap(value_parser(parse_number::<u8>))]
	#[clap(default_value = "0")]
	subindex: u8,

	/// Timeout in seconds for the SDO transfer.
	#[clap(long, short)]
	#[clap(value_parser(parse_timeout))]
	#[clap(default_value = "1")]
	timeout: Duration,
}

#[tokio::main]
async fn main() {
	env_logger::builder()
		.filter_module(module_path!(), log::LevelFilter::Info)
		.parse_default_env()
		.init();
	if let Err(()) = do_main(clap::Parser::parse()).await {
		std::process::exit(1);
	}
}

async fn do_main(options: Options) -> Result<(), ()> {
	let socket = CanSocket::bind(&options.interface)
		.map_err(|e| log::error!("failed to create CAN socket for interface {}: {e}", options.interface))?;
	let canopen = CanOpenSocket::new(socket);

	let data = canopen_socket::sdo::read_object(&canopen, options.node_id, options.index, options.subindex, options.timeout)
		.await
		.map_err(|e| log::error!("failed to read 0x{:04X}:{:02X} from node {}: {e}", options.index, options.subindex, options.node_id))?;

	log::info!("0x{:04X}:{:02X} = {data:02X?}", options.index, options.subindex);
	Ok(())
}

fn parse_timeout(input: &str) -> Result<Duration, &'static str> {
	let seconds: f64 = input.parse().map_err(|_| "invalid duration: expected timeout in seconds")?;
	Ok(Duration::from_secs_f64(seconds))
}

fn parse_number<T>(input: &str) -> Result<T, String>
where
	T: TryFrom<i128>,
	T::Error: std::fmt::Display,
{
	let value = if let Some(hexadecimal) = input.strip_prefix("0x") {
		i128::from_str_radix(hexadecimal, 16).map_err(|e| e.to_string())?
	} else if let Some(octal) = input.strip_prefix("0o") {
		i128::from_str_radix(octal, 8).map_err(|e| e.to_string())?
	} else if let Some(binary) = input.strip_prefix("0b") {
		i128::from_str_radix(binary, 2).map_err(|e| e.to_string())?
	} else {
		input.parse::<i128>().map_err(|e| e.to_string())?
	};
	T::try_from(value).map_err(|e| e.to_string())
}
