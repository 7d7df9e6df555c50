use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // BSG_SIGNER_PRIVATE_KEY is deliberately absent
    const DISPLAY_ENVS: [&str; 21] = [
        "RUST_LOG",
        "BSG_HOST",
        "BSG_PORT",
        "BSG_DATABASE_URL",
        "BSG_CHAIN_WS_URL",
        "BSG_CHAIN_HTTP_URL",
        "BSG_CHAIN_ID",
        "BSG_ESCROW_CONTRACT",
        "BSG_EIP712_NAME",
        "BSG_EIP712_VERSION",
        "BSG_TOKEN_DECIMALS",
        "BSG_AUTHORIZATION_WINDOW_SECS",
        "BSG_QUEUE_BATCH_SIZE",
        "BSG_QUEUE_IDLE_SWEEP_SECS",
        "BSG_RECONNECT_BASE_DELAY_SECS",
        "BSG_RECONNECT_MAX_DELAY_SECS",
        "BSG_RECONNECT_MAX_ATTEMPTS",
        "BSG_RECONCILER_ATTEMPTS",
        "BSG_RECONCILER_INTERVAL_SECS",
        "BSG_RECONCILER_BLOCK_RANGE",
        "BSG_AUTOSTART_MONITOR",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
