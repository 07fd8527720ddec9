use crate::context::AppContext;
use crate::strategy::StrategyKind;
use anyhow::{Context, Result};

pub async fn run(app: &AppContext, show_current: bool) -> Result<()> {
    println!("{:<45} PARAMETER GROUP", "STRATEGY");
    for kind in StrategyKind::ALL {
        let group = kind
            .parameter_group()
            .map(|group| group.field_name())
            .unwrap_or("-");
        println!("{:<45} {}", kind.name(), group);
    }

    if show_current {
        let client = app.api_client()?;
        let parameters = client
            .strategy_parameters()
            .await
            .context("failed to load current strategy parameters")?;
        println!("\nCurrent parameters:");
        println!("{}", serde_json::to_string_pretty(&parameters)?);
    }

    Ok(())
}
