fn main() -> anyhow::Result<()> {
    kubestress_runner::cli::execute()
}
