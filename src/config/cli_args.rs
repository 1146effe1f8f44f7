use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "testpool",
    version,
    about = "Distribute and execute test cases across pools of devices",
    after_help = "EXIT CODES:\n  0  all tests passed\n  1  test failures\n  2  scheduling or configuration failure\n\nEXAMPLES:\n  testpool --config testpool.toml\n  testpool --manifest tests.toml --filter 'LoginTest#.*'\n  testpool --retry 2 --timeout 600\n  testpool --list\n  testpool --dry-run --config lab.toml"
)]
pub struct CliArgs {
    // Run configuration file with [run] options and [[pools]] tables
    #[clap(
        short = 'c',
        long = "config",
        default_value = "testpool.toml",
        help = "Path to run configuration file"
    )]
    pub config: PathBuf,

    // Test case manifest - overrides the path in the configuration file
    #[clap(short = 'm', long = "manifest", help = "Path to test case manifest")]
    pub manifest: Option<PathBuf>,

    // Output directory for results.json and summary.md
    #[clap(short = 'o', long = "output", help = "Output directory for reports")]
    pub output: Option<PathBuf>,

    // Regex over "class#method" selecting which test cases run
    #[clap(long = "filter", help = "Regex selecting test cases by class#method")]
    pub filter: Option<String>,

    // Retry budget - how many failures a test may accumulate before it is final
    #[clap(long = "retry", help = "Retry budget per test case")]
    pub retry: Option<u32>,

    // Command execution timeout (seconds)
    #[clap(long = "timeout", help = "Command timeout in seconds")]
    pub timeout: Option<u64>,

    // Device poll timeout (seconds)
    #[clap(long = "poll-timeout", help = "Device poll timeout in seconds")]
    pub poll_timeout: Option<u64>,

    // Verbose mode - show debug log output
    #[clap(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,

    // Quiet mode - warnings and errors only
    #[clap(short = 'q', long = "quiet", help = "Suppress non-essential output")]
    pub quiet: bool,

    // Validate scheduling (pools, manifest, runner bindings) without executing
    #[clap(long = "dry-run", help = "Validate scheduling without executing")]
    pub dry_run: bool,

    // Print the execution plan (pool -> device -> test cases) and exit
    #[clap(long = "list", help = "Print the execution plan and exit")]
    pub list: bool,
}
