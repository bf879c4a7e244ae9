//! `ssync login` / `ssync logout`.

use surveysync_store_client::{delete_credentials, resolve_credentials, save_credentials};

use crate::exit_codes::EXIT_ERROR;
use crate::survey::remote_client;
use crate::{CliError, Globals};

/// Resolve credentials (flag > env > saved), check them against the
/// employees table, then save them.
pub fn cmd_login(globals: &Globals) -> Result<(), CliError> {
    let config = globals.load_config()?;
    let creds = resolve_credentials(globals.url.as_deref(), globals.api_key.as_deref())
        .map_err(CliError::store)?;

    let client = remote_client(globals, &config)?;
    client.probe(&config.tables.employees).map_err(CliError::store)?;

    let path = save_credentials(&creds).map_err(|e| CliError::new(EXIT_ERROR, e))?;
    println!("Logged in to {}", creds.url);
    eprintln!("saved {}", path.display());
    Ok(())
}

pub fn cmd_logout() -> Result<(), CliError> {
    match delete_credentials() {
        Ok(true) => println!("Logged out"),
        Ok(false) => println!("No saved credentials"),
        Err(e) => return Err(CliError::new(EXIT_ERROR, e)),
    }
    Ok(())
}
