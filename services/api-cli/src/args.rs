//! Command-line parsing

use anyhow::{Context, Result, bail};
use request_orchestrator::{Method, QueryParams};
use serde_json::Value;

pub const USAGE: &str = "\
usage: api-call [--config PATH] [--query KEY=VALUE]... [--data JSON]
                [--retries N] [--timeout-ms MS] [--metrics] METHOD PATH";

#[derive(Debug)]
pub struct Args {
    pub config: Option<String>,
    pub method: Method,
    pub path: String,
    pub data: Option<Value>,
    pub query: QueryParams,
    /// Total attempts for the outer retry; `None` issues a single call
    pub retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub metrics: bool,
}

pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut config = None;
    let mut data = None;
    let mut query = QueryParams::new();
    let mut retries = None;
    let mut timeout_ms = None;
    let mut metrics = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} requires a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--config" => config = Some(value_for("--config")?),
            "--data" => {
                let raw = value_for("--data")?;
                data = Some(serde_json::from_str(&raw).context("--data must be valid JSON")?);
            }
            "--query" => {
                let pair = value_for("--query")?;
                let Some((key, value)) = pair.split_once('=') else {
                    bail!("--query expects KEY=VALUE, got: {pair}");
                };
                query.push(key, value);
            }
            "--retries" => {
                let n: u32 = value_for("--retries")?
                    .parse()
                    .context("--retries must be a positive integer")?;
                if n == 0 {
                    bail!("--retries must be greater than 0");
                }
                retries = Some(n);
            }
            "--timeout-ms" => {
                timeout_ms = Some(
                    value_for("--timeout-ms")?
                        .parse()
                        .context("--timeout-ms must be an integer")?,
                );
            }
            "--metrics" => metrics = true,
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let [method, path]: [String; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected METHOD and PATH\n{USAGE}"))?;
    let method = method.parse::<Method>().map_err(anyhow::Error::msg)?;

    Ok(Args {
        config,
        method,
        path,
        data,
        query,
        retries,
        timeout_ms,
        metrics,
    })
}
