//! Command-line interface definitions.
//!
//! One subcommand per recipe. Global options may appear before or after the
//! subcommand, and the LLM credentials can also come from the environment
//! (or a `.env` file).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for rumor_crawler.
///
/// # Examples
///
/// ```sh
/// # Collect every listing entry, then extract rumors from the articles
/// rumor_crawler -o ./data loop-links
/// rumor_crawler -o ./data fake-news
///
/// # Hot-news ranking as Markdown, with a visible browser window
/// rumor_crawler --headful hot-news-markdown
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory the JSON and Markdown files are written to
    #[arg(short, long, global = true, default_value = "./data")]
    pub output_dir: PathBuf,

    /// Optional YAML file overriding the built-in site settings
    #[arg(short, long, global = true)]
    pub site_config: Option<PathBuf>,

    /// Optional path to the LLM config.yaml file
    #[arg(short = 'c', long, global = true)]
    pub llm_config: Option<String>,

    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    pub headful: bool,

    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_BASE_URL", global = true)]
    pub api_base: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch the rumor listing once, clicking "load more" a fixed number of times
    Links {
        /// Override the configured number of clicks
        #[arg(long)]
        max_clicks: Option<u32>,
    },
    /// Keep loading the rumor listing until no new entries appear
    LoopLinks {
        /// Override the configured poll limit
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Extract rumors from every saved listing link with the LLM
    FakeNews {
        /// Render articles in the browser instead of plain HTTP requests
        #[arg(long)]
        browser: bool,
    },
    /// Extract the hot-news ranking with the LLM
    HotNews,
    /// Save the hot-news page as Markdown
    HotNewsMarkdown {
        /// Convert the whole page rather than only the ranking region
        #[arg(long)]
        full_page: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "rumor_crawler",
            "--output-dir",
            "./out",
            "--site-config",
            "./site.yaml",
            "loop-links",
            "--max-iterations",
            "5",
        ]);

        assert_eq!(cli.output_dir, PathBuf::from("./out"));
        assert_eq!(cli.site_config, Some(PathBuf::from("./site.yaml")));
        assert_eq!(
            cli.command,
            Command::LoopLinks {
                max_iterations: Some(5)
            }
        );
        assert!(!cli.headful);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["rumor_crawler", "-o", "/tmp/data", "-c", "/tmp/config.yaml", "hot-news"]);

        assert_eq!(cli.output_dir, PathBuf::from("/tmp/data"));
        assert_eq!(cli.llm_config.as_deref(), Some("/tmp/config.yaml"));
        assert_eq!(cli.command, Command::HotNews);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["rumor_crawler", "hot-news-markdown", "--full-page", "--headful"]);

        assert!(cli.headful);
        assert_eq!(cli.output_dir, PathBuf::from("./data"));
        assert_eq!(cli.command, Command::HotNewsMarkdown { full_page: true });
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["rumor_crawler"]).is_err());
    }

    #[test]
    fn test_fake_news_defaults_to_http() {
        let cli = Cli::parse_from(["rumor_crawler", "fake-news"]);
        assert_eq!(cli.command, Command::FakeNews { browser: false });
        let cli = Cli::parse_from(["rumor_crawler", "links"]);
        assert_eq!(cli.command, Command::Links { max_clicks: None });
    }
}
