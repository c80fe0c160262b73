use lectern_core::keys;
use uuid::Uuid;

/// Run the `keygen` command: generate a 2048-bit RSA signing key and print
/// the environment export lines an operator needs to persist it.
pub fn run() -> anyhow::Result<()> {
    let pem = keys::generate_key_pem()?;
    let kid = Uuid::new_v4().to_string();
    keys::print_export_instructions(&pem, &kid);
    Ok(())
}
