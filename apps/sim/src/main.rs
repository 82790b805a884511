//! # BMCU Sim
//!
//! 在主机上用 Mock 硬件运行固件核心。
//!
//! ```bash
//! # 解析一段十六进制抓包
//! bmcu-sim decode "3D C5 07 ..."
//!
//! # BambuBus 模式：送入请求帧，打印回复帧
//! bmcu-sim simulate --frame 3DC5... --present 0,2 --ticks 10
//!
//! # Klipper 模式：stdin/stdout 上的 JSON 行协议，Ctrl-C 停止所有电机
//! bmcu-sim klipper --settings ./bmcu-settings.json
//!
//! # 打印默认配置
//! bmcu-sim config > bmcu.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod store;
mod utils;

use commands::{ConfigCommand, DecodeCommand, KlipperCommand, SimulateCommand};

/// BMCU 固件主机仿真器
#[derive(Parser, Debug)]
#[command(name = "bmcu-sim")]
#[command(about = "Host simulator for the BMCU firmware core", long_about = None)]
#[command(version)]
struct Cli {
    /// 固件配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志过滤（RUST_LOG 优先）
    #[arg(long, global = true, default_value = "bmcu=info,warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 解析十六进制抓包中的所有帧
    Decode(DecodeCommand),

    /// 在 Mock 硬件上运行 BambuBus 协议栈
    Simulate(SimulateCommand),

    /// 在 stdin/stdout 上运行 Klipper 模式
    Klipper(KlipperCommand),

    /// 打印配置（TOML）
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    bmcu_firmware::init_logging(&cli.log);

    let config = utils::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Decode(cmd) => cmd.execute(),
        Commands::Simulate(cmd) => cmd.execute(config),
        Commands::Klipper(cmd) => cmd.execute(config),
        Commands::Config(cmd) => cmd.execute(&config),
    }
}
