use anyhow::Result;

use crate::config::Config;

pub fn list_sources(config: &Config) -> Result<()> {
    // Filesystem connector
    let fs_status = match &config.connectors.filesystem {
        Some(fs_config) => {
            if fs_config.root.exists() {
                ("OK", true)
            } else {
                ("NOT CONFIGURED (root does not exist)", false)
            }
        }
        None => ("NOT CONFIGURED", false),
    };

    // HTTP connector
    let http_status = match &config.connectors.http {
        Some(http_config) => {
            if http_config.urls.is_empty() {
                ("NOT CONFIGURED (no urls)", false)
            } else {
                ("OK", true)
            }
        }
        None => ("NOT CONFIGURED", false),
    };

    println!("{:<16} {:<40} HEALTHY", "CONNECTOR", "STATUS");
    println!("{:<16} {:<40} {}", "filesystem", fs_status.0, fs_status.1);
    println!("{:<16} {:<40} {}", "http", http_status.0, http_status.1);

    Ok(())
}
