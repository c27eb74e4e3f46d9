//! `braid init` - initialize a workspace.

use crate::config;
use crate::error::Result;
use crate::storage::Storage;

pub fn execute(prefix: &str, force: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let workspace_dir = config::init_workspace(&cwd, prefix, force)?;

    // Create the database up front so the first mutating command does not
    // race another process on schema creation.
    let paths = config::ConfigPaths::resolve(&workspace_dir)?;
    let storage = Storage::open(&paths.db_path)?;
    storage.close();

    println!("Initialized braid workspace at {}", workspace_dir.display());
    println!("Issue prefix: {prefix}");
    Ok(())
}
