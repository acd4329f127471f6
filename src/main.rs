use std::path::PathBuf;

use anyhow::Result;
use answer_sheet_grader::utils::logging;
use answer_sheet_grader::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：GRADER_CONFIG 指定的文件，默认 grader.toml，再叠加环境变量
    let config_path = std::env::var("GRADER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("grader.toml"));
    let config = Config::load(Some(config_path.as_path()))?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
