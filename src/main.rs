use anyhow::Result;

fn main() -> Result<()> {
    bindery::cli::run::<std::ffi::OsString>(None)
}
