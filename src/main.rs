fn main() -> anyhow::Result<()> {
    notedesk::cli::run()
}
