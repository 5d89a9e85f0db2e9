use anyhow::Context as _;
use cqbridge::config::AppConfig;
use cqbridge::cq::{self, DecodeOptions, ElementsExt};
use cqbridge::element::{Element, ElementKind};
use cqbridge::log::{self, Level};
use cqbridge::resource::Resolver;
use cqbridge::{adapters::onebot, info, warn};
use simd_json::derived::ValueObjectAccessAsScalar;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("config.toml")
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("加载 config.toml 失败")?;

    match Level::parse(&config.log_level) {
        Some(level) => log::set_level(level),
        None => warn!("未知的日志级别 {}，使用 info", config.log_level),
    }

    let options = Arc::new(DecodeOptions::default().with_resolver(Resolver::new(
        config.resource.max_file_size,
    )));

    info!("cqbridge 启动，连接 {}", config.onebot.url);

    onebot::run_bot_loop(config.onebot.clone(), move |invoker, event| {
        let options = options.clone();
        async move {
            if event.get_str("post_type") != Some("message") {
                return;
            }
            let Some(raw) = event.get_str("raw_message") else {
                return;
            };

            let elements = cq::decode(raw, &options);
            let sender = event.get_i64("user_id").unwrap_or_default();
            let mentioned = invoker.self_id().is_some_and(|id| {
                let id = id.to_string();
                elements
                    .all_of(ElementKind::At)
                    .any(|el| matches!(el, Element::At { target } if *target == id))
            });

            info!(
                target: "Bot",
                "收到 {} 的消息: {} (共 {} 个元素{})",
                sender,
                cq::encode(&elements),
                elements.len(),
                if mentioned { "，提及了本账号" } else { "" }
            );
        }
    })
    .await;

    Ok(())
}
