//! CLI module
//!
//! This module provides the command-line interface functionality for the reasongrid tool.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io::{self, Read};
use std::sync::Arc;

use crate::{
    api::{serve, Client, ClientConfig, ServerConfig},
    grid::Grid,
    layout::layout,
    models::{Analysis, AnalysisId, AnalysisStatus, Core, Task},
    provider::{HttpCompletionSource, ProviderConfig},
    redact::redact_response,
    render::{render_text, TextStyle, STANDARD_TOOLS},
    stream::{decode_response, StreamIngest},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API server URL
    #[arg(short, long, global = true, default_value = "http://localhost:3000")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the reasongrid API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Chat completions endpoint
        #[arg(long, env = "SUBCONSCIOUS_API_URL")]
        api_url: Option<String>,

        /// API key for the completions endpoint
        #[arg(long, env = "SUBCONSCIOUS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Model name
        #[arg(long, env = "SUBCONSCIOUS_MODEL")]
        model: Option<String>,

        /// URL the model's tools are served from
        #[arg(long, env = "TOOL_ENDPOINT")]
        tool_endpoint: Option<String>,
    },

    /// Submit a paper for analysis
    Analyze {
        /// URL of the paper
        paper_url: String,
    },

    /// List all analyses
    List,

    /// Show the status of an analysis
    Status {
        /// Analysis id
        id: u32,
    },

    /// Draw the reasoning grid of an analysis
    Show {
        /// Analysis id
        id: u32,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Draw the grid of a local response buffer or stream capture
    Render {
        /// File to read; stdin when omitted
        file: Option<String>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            port,
            api_url,
            api_key,
            model,
            tool_endpoint,
        } => {
            println!("Starting reasongrid API server on port {}...", port);

            let defaults = ProviderConfig::default();
            let provider = ProviderConfig {
                api_url: api_url.clone().unwrap_or(defaults.api_url),
                api_key: api_key.clone(),
                model: model.clone().unwrap_or(defaults.model),
                tool_endpoint: tool_endpoint.clone().unwrap_or(defaults.tool_endpoint),
                ..defaults
            };
            if provider.api_key.is_none() {
                println!("Warning: no API key configured; analyses will fail until one is set");
            }

            // Create a server configuration with the specified port
            let config = ServerConfig {
                address: ([127, 0, 0, 1], *port).into(),
            };

            serve(
                Core::new(),
                Arc::new(HttpCompletionSource::new(provider)),
                config,
            )
            .await?;
            Ok(())
        }

        Commands::Analyze { paper_url } => {
            let client = create_client(&cli.server);
            let id = client.submit(paper_url).await?;
            println!("Paper analysis request received: {}", id);
            println!("Follow it with 'reasongrid show {}' or at {}/ui/{}", id, cli.server, id);
            Ok(())
        }

        Commands::List => {
            let client = create_client(&cli.server);
            let analyses = client.list().await?;
            if analyses.is_empty() {
                println!("No analyses yet. Submit one with 'reasongrid analyze <url>'");
            }
            for analysis in &analyses {
                println!(
                    "{:>6}  {:<10}  {}",
                    analysis.id,
                    analysis.status.to_string(),
                    analysis.paper_url
                );
            }
            Ok(())
        }

        Commands::Status { id } => {
            let client = create_client(&cli.server);
            let analysis = client.get(AnalysisId::new(*id)).await?;
            print_status(&analysis);
            Ok(())
        }

        Commands::Show { id, no_color } => {
            let client = create_client(&cli.server);
            let id = AnalysisId::new(*id);
            let analysis = client.get(id).await?;
            print_status(&analysis);
            println!();
            print_grid(client.grid(id).await?.as_ref(), !no_color);
            Ok(())
        }

        Commands::Render { file, no_color } => {
            let buffer = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => {
                    let mut buffer = String::new();
                    io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };
            let forest = forest_from_buffer(&buffer);
            print_grid(layout(&forest).as_ref(), !no_color);
            Ok(())
        }

        Commands::Completions { shell } => {
            // Generate completions for the specified shell
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn create_client(server_url: &str) -> Client {
    let config = ClientConfig {
        base_url: server_url.to_string(),
    };

    Client::with_config(config)
}

/// Redacted forest from either a raw response buffer or a captured event stream
fn forest_from_buffer(buffer: &str) -> Vec<Task> {
    let is_event_stream = buffer
        .lines()
        .any(|line| line.trim_start().starts_with("data:"));

    let redacted = if is_event_stream {
        let mut ingest = StreamIngest::new();
        ingest.push_bytes(buffer.as_bytes());
        ingest.finish();
        ingest.tick().redacted
    } else {
        decode_response(buffer).map(|response| redact_response(&response))
    };

    redacted.map(|response| response.reasoning).unwrap_or_default()
}

fn print_status(analysis: &Analysis) {
    let status = analysis.status.to_string();
    let status = status.as_str();
    let status = match analysis.status {
        AnalysisStatus::Completed => status.green(),
        AnalysisStatus::Failed => status.red(),
        AnalysisStatus::Processing => status.yellow(),
        AnalysisStatus::Pending => status.normal(),
    };
    println!("Analysis {} [{}]", analysis.id, status);
    println!("  Paper: {}", analysis.paper_url);
    println!(
        "  Updated: {}",
        analysis
            .updated_at
            .unwrap_or(analysis.created_at)
            .format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(tokens) = analysis.tokens_read {
        println!("  Tokens read: {}", tokens);
    }
    if let Some(snapshot) = &analysis.snapshot {
        println!("  Updates received: {}", snapshot.iteration_count);
    }
    if let Some(error) = &analysis.error {
        println!("  Error: {}", error);
    }
    if let Some(answer) = analysis
        .result
        .as_ref()
        .and_then(|result| result.response.as_ref())
        .map(|response| response.answer.as_str())
        .filter(|answer| !answer.is_empty())
    {
        println!("\nAnswer:\n{}", answer);
    }
}

fn print_grid(grid: Option<&Grid>, color: bool) {
    match grid {
        Some(grid) => {
            let style = TextStyle {
                color,
                ..TextStyle::default()
            };
            println!("{}", render_text(grid, &STANDARD_TOOLS, &style));
        }
        None => println!("nothing to render"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::PRESENCE_MARKER;
    use serde_json::json;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["reasongrid", "show", "42", "--no-color"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Show {
                id: 42,
                no_color: true
            }
        ));
        assert_eq!(cli.server, "http://localhost:3000");

        let cli = Cli::try_parse_from([
            "reasongrid",
            "analyze",
            "https://arxiv.org/abs/1",
            "--server",
            "http://remote:4000",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://remote:4000");

        assert!(Cli::try_parse_from(["reasongrid", "status", "not-a-number"]).is_err());
    }

    #[test]
    fn test_forest_from_truncated_buffer() {
        let buffer = r#"Here is my analysis: {"reasoning": [{"thought": "read", "conclusion": "long text"}, {"thought": "comp"#;
        let forest = forest_from_buffer(buffer);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].conclusion.as_deref(), Some(PRESENCE_MARKER));
        assert_eq!(forest[1].thought.as_deref(), Some("comp"));
    }

    #[test]
    fn test_forest_from_event_stream_capture() {
        let content = json!({"reasoning": [{"thought": "search", "subtasks": [{"thought": "a"}]}]})
            .to_string();
        let (head, tail) = content.split_at(20);
        let capture = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            json!({"choices": [{"delta": {"content": head}}]}),
            json!({"choices": [{"delta": {"content": tail}}]})
        );

        let forest = forest_from_buffer(&capture);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].subtasks.len(), 1);
    }

    #[test]
    fn test_forest_from_garbage_is_empty() {
        assert!(forest_from_buffer("no json here").is_empty());
        assert!(layout(&forest_from_buffer("")).is_none());
    }
}
