use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;

pub mod decode;
pub mod hooks;
pub mod inject;

#[derive(Subcommand)]
pub enum Cmd {
    /// Apply mixins to a directory of class files
    Inject(inject::InjectArgs),

    /// Print the structure and disassembly of a class file
    Decode(decode::DecodeArgs),

    /// Validate and summarise a hook table
    Hooks(hooks::HooksArgs),
}

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Inject(args) => args.execute().await,
            Cmd::Decode(args) => args.execute().await,
            Cmd::Hooks(args) => args.execute().await,
        }
    }
}
