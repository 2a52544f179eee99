use super::args::*;

pub mod run;
pub mod show;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::cmd_run(args).await,
        Command::Show(args) => show::cmd_show(args),
    }
}
