fn main() -> anyhow::Result<()> {
    view_dispatch::cli::run_cli()
}
