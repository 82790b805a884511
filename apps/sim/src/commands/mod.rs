//! 子命令

pub mod config;
pub mod decode;
pub mod klipper;
pub mod simulate;

pub use config::ConfigCommand;
pub use decode::DecodeCommand;
pub use klipper::KlipperCommand;
pub use simulate::SimulateCommand;
