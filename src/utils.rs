use colored::Colorize;
use ethers::types::H256;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use url::Url;

use crate::errors::{DistributionError, Result};

pub fn setup_logger(level: LevelFilter) -> Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .trace(Color::BrightBlack)
        .debug(Color::White)
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for("token_distributor", level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

/// `<explorer>/tx/0x<hash>`
pub fn explorer_tx_url(explorer: &Url, tx_hash: &H256) -> Result<Url> {
    explorer
        .join(&format!("tx/{tx_hash:#x}"))
        .map_err(|e| DistributionError::InvalidArgument(format!("explorer url {explorer}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_tx_url() {
        let explorer = Url::parse("https://sepolia.etherscan.io/").unwrap();
        let url = explorer_tx_url(&explorer, &H256::repeat_byte(0xab)).unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://sepolia.etherscan.io/tx/0x{}", "ab".repeat(32))
        );
    }
}
