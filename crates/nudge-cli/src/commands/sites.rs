//! Entertainment site list commands.

use std::io::Write;

use anyhow::{Context, Result};
use nudge_store::SqliteStore;

pub fn list<W: Write>(writer: &mut W, store: &SqliteStore) -> Result<()> {
    let state = store.state().context("failed to read guard state")?;
    let sites = state.entertainment_sites();
    if sites.is_empty() {
        writeln!(writer, "No blocked sites.")?;
        return Ok(());
    }
    for site in sites {
        writeln!(writer, "{site}")?;
    }
    Ok(())
}

pub fn add<W: Write>(writer: &mut W, store: &SqliteStore, site: &str) -> Result<()> {
    let added = store
        .modify(|s| s.add_entertainment_site(site))
        .context("failed to update guard state")??;
    if added {
        tracing::info!(site, "site blocked");
        writeln!(writer, "Blocked {}", nudge_core::domain::normalize_site(site))?;
    } else {
        writeln!(writer, "Already blocked.")?;
    }
    Ok(())
}

pub fn remove<W: Write>(writer: &mut W, store: &SqliteStore, site: &str) -> Result<()> {
    let removed = store
        .modify(|s| s.remove_entertainment_site(site))
        .context("failed to update guard state")?;
    if removed {
        tracing::info!(site, "site unblocked");
        writeln!(writer, "Unblocked {}", nudge_core::domain::normalize_site(site))?;
    } else {
        writeln!(writer, "Not in the list.")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn add_normalizes_and_dedupes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut output = Vec::new();
        add(&mut output, &store, "https://www.Hulu.com/").unwrap();
        add(&mut output, &store, "hulu.com").unwrap();
        remove(&mut output, &store, "youtube.com").unwrap();
        remove(&mut output, &store, "youtube.com").unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Blocked hulu.com
        Already blocked.
        Unblocked youtube.com
        Not in the list.
        ");
    }

    #[test]
    fn add_rejects_empty_site() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut output = Vec::new();
        assert!(add(&mut output, &store, "  ").is_err());
    }

    #[test]
    fn list_prints_one_site_per_line() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .modify(|s| {
                for site in nudge_core::DEFAULT_ENTERTAINMENT_SITES {
                    s.remove_entertainment_site(site);
                }
            })
            .unwrap();

        let mut output = Vec::new();
        list(&mut output, &store).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "No blocked sites.\n");

        store
            .modify(|s| s.add_entertainment_site("twitch.tv"))
            .unwrap()
            .unwrap();
        let mut output = Vec::new();
        list(&mut output, &store).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "twitch.tv\n");
    }
}
