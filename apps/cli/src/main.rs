use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use br1efly_core_sdk::config::{self, ConfigForm};
use br1efly_core_sdk::db::{self, SqliteConfigStore, SqliteHistoryStore};
use br1efly_core_sdk::models::MenuClick;
use br1efly_core_sdk::{history, menu, prompt, server, telemetry, Completer};

/**
 * \brief CLI 程序入口：配置、菜单预览与对选中文本执行动作。
 */
#[derive(Parser, Debug)]
#[command(name = "br1efly", version, about = "br1efly text actions from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存配置（语言、Provider、Key、模型、自定义 prompts）。
     * \param api_type openai 或 azure
     * \param endpoint Azure 资源地址，OpenAI 可留空
     * \param prompts_file 自定义 prompts 的 YAML 文件
     */
    Configure {
        #[arg(long, default_value = "english")]
        language: String,
        #[arg(long, default_value = "openai")]
        api_type: String,
        #[arg(long)]
        api_key: String,
        #[arg(long, default_value = "gpt-3.5-turbo")]
        model: String,
        #[arg(long, default_value = "")]
        endpoint: String,
        #[arg(long)]
        prompts_file: Option<String>,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief 对一段文本执行菜单动作并打印结果。
     */
    Complete {
        #[arg(long)]
        action: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        url: Option<String>,
    },

    /** \brief 打印当前菜单树（JSON）。 */
    Menus {
        #[arg(long, default_value_t = false)]
        flat: bool,
    },

    /** \brief 打印合并后的 prompt 目录。 */
    Prompts,

    /** \brief 校验 prompts YAML 文件，不写入配置。 */
    ValidatePrompts {
        #[arg(long)]
        file: String,
    },

    /** \brief 查看最近的历史记录。 */
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let local = db::open_db(db::LOCAL_DB_FILE).context("open local database failed")?;
    db::migrate(&local).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&local).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Configure {
            language,
            api_type,
            api_key,
            model,
            endpoint,
            prompts_file,
            enable_telemetry,
        } => {
            let prompts = match prompts_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read prompts file {} failed", path))?,
                None => String::new(),
            };
            let form = ConfigForm {
                language,
                api_type,
                api_key,
                model,
                endpoint,
                prompts,
            };
            let store = SqliteConfigStore::open_default().context("open config store failed")?;
            config::save_config(&store, &form)
                .await
                .context("save config failed")?;
            db::set_telemetry_enabled(&local, enable_telemetry)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!(
                "Saved config ({} | {} | {})",
                form.api_type, form.model, form.language
            );
        }
        Commands::Complete { action, text, url } => {
            let config = SqliteConfigStore::open_default().context("open config store failed")?;
            let history =
                SqliteHistoryStore::open_default().context("open history store failed")?;
            let completer = Completer::new(Arc::new(config), Arc::new(history));

            telemetry::log_event(
                "cli.complete",
                &format!("action={} text_len={}", action, text.len()),
            );

            let click = MenuClick { action, text, url };
            let result = completer
                .run_click(&click)
                .await
                .with_context(|| format!("{} failed", click.action))?;
            println!("{}", result);
        }
        Commands::Menus { flat } => {
            let prompts = stored_prompts().await?;
            let tree = menu::build_menu_tree(prompts.as_deref());
            let nodes = if flat {
                menu::flatten_menu_tree(&tree)
            } else {
                tree
            };
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
        Commands::Prompts => {
            let prompts = stored_prompts().await?;
            for p in prompt::resolve_catalog(prompts.as_deref()).values() {
                let marker = if p.is_implemented() { " " } else { "!" };
                println!("{} {:<22} {}", marker, p.identifier, p.menu_title());
            }
        }
        Commands::ValidatePrompts { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("read prompts file {} failed", file))?;
            let overlay = prompt::validate_overlay(&raw).context("invalid prompts")?;
            println!("OK: {} prompt(s)", overlay.entries().len());
        }
        Commands::History { limit } => {
            let store = SqliteHistoryStore::open_default().context("open history store failed")?;
            let list = history::list_history(&store)
                .await
                .context("load history failed")?;
            let skip = list.len().saturating_sub(limit);
            for record in list.iter().skip(skip) {
                println!(
                    "[{}] {} {}\n  > {}\n  < {}",
                    record.recorded_at,
                    record.action,
                    record.source_url,
                    record.selection,
                    record.result.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Serve { addr } => {
            server::run(&addr).await?;
        }
    }

    Ok(())
}

/**
 * \brief 读取已保存的自定义 prompts，未设置时返回 None。
 */
async fn stored_prompts() -> Result<Option<String>> {
    use br1efly_core_sdk::config::ConfigStore;

    let store = SqliteConfigStore::open_default().context("open config store failed")?;
    let raw = store
        .get(config::KEY_PROMPTS)
        .await
        .context("read prompts failed")?;
    Ok(if raw.trim().is_empty() { None } else { Some(raw) })
}
