// CLI Commands
// One module per subcommand

pub mod partition;
pub mod run;
pub mod seeds;
pub mod status;
pub mod validate;
pub mod worker;
