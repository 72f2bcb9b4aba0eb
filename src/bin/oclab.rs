//! oclab - occupancy validation lab CLI

fn main() -> anyhow::Result<()> {
    occupancy_lab::cli::run()
}
