//! Stdio bridge: newline-delimited JSON-RPC on stdin/stdout, forwarded to
//! the daemon's HTTP control endpoint.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// JSON-RPC internal error, used when the daemon cannot be reached.
const INTERNAL_ERROR: i64 = -32603;

/// Bridge the process's stdin/stdout to `url` until stdin closes.
pub(crate) async fn run_stdio_bridge(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!(url, "MCP stdio bridge started");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    bridge(stdin, stdout, &Client::new(), url).await?;
    info!("stdin closed, MCP stdio bridge exiting");
    Ok(())
}

/// Forward each request line and write back each response as one line.
///
/// Requests are handled one at a time. Notifications produce no output.
pub(crate) async fn bridge<R, W>(
    reader: R,
    mut writer: W,
    client: &Client,
    url: &str,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(response) = forward(client, url, line).await {
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

async fn forward(client: &Client, url: &str, line: &str) -> Option<String> {
    let request = client
        .post(url)
        .header("content-type", "application/json")
        .body(line.to_string());

    match request.send().await {
        Ok(response) if response.status() == StatusCode::ACCEPTED => {
            debug!("notification forwarded");
            None
        }
        Ok(response) => match response.text().await {
            Ok(body) => Some(body.trim().to_string()),
            Err(e) => transport_error(line, &e.to_string()),
        },
        Err(e) => {
            warn!(error = %e, "control endpoint unreachable");
            transport_error(line, &e.to_string())
        }
    }
}

/// An error response for a request the daemon never answered. Requests
/// without an id are notifications and get nothing.
fn transport_error(line: &str, message: &str) -> Option<String> {
    let request: Value = serde_json::from_str(line).ok()?;
    let id = request.get("id").filter(|id| !id.is_null())?.clone();
    Some(
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": INTERNAL_ERROR,
                "message": format!("drawbridge daemon unreachable: {message}"),
            }
        })
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawbridge_api::{DrawbridgeServer, Services};
    use drawbridge_config::{Config, Mode};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn start_queued_daemon(work: &TempDir, shutdown: &CancellationToken) -> String {
        let mut config = Config::default();
        config.mode = Mode::Queued;
        config.work_dir = Some(work.path().to_path_buf());
        let config = config.resolve_paths(work.path());

        let services = Services::from_config(&config, shutdown.clone()).await.unwrap();
        let handle = DrawbridgeServer::new("127.0.0.1:0", "127.0.0.1:0", services.state)
            .start(shutdown.clone())
            .await
            .unwrap();
        format!("http://{}/mcp", handle.control_addr())
    }

    #[tokio::test]
    async fn test_bridge_forwards_requests_and_skips_notifications() {
        let work = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let url = start_queued_daemon(&work, &shutdown).await;

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let mut output = Vec::new();
        bridge(input.as_bytes(), &mut output, &Client::new(), &url)
            .await
            .unwrap();
        shutdown.cancel();

        let output = String::from_utf8(output).unwrap();
        let responses: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert!(responses[0]["result"]["serverInfo"].is_object());
        assert_eq!(responses[1]["id"], 2);
        assert!(responses[1]["result"]["tools"].as_array().unwrap().len() >= 7);
    }

    #[tokio::test]
    async fn test_bridge_reports_unreachable_daemon() {
        // Nothing listens on port 9 locally.
        let url = "http://127.0.0.1:9/mcp";
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":"a","method":"get_pending"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
        );
        let mut output = Vec::new();
        bridge(input.as_bytes(), &mut output, &Client::new(), url)
            .await
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);
        let response: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(response["id"], "a");
        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
    }

    #[test]
    fn test_transport_error_needs_an_id() {
        assert!(transport_error(r#"{"jsonrpc":"2.0","method":"x"}"#, "down").is_none());
        assert!(transport_error(r#"{"jsonrpc":"2.0","id":null,"method":"x"}"#, "down").is_none());
        assert!(transport_error("not json", "down").is_none());
        let err = transport_error(r#"{"jsonrpc":"2.0","id":7,"method":"x"}"#, "down").unwrap();
        assert!(err.contains("\"id\":7"));
    }
}
