//! Integration tests for the dangerous-command guard.

use shellcore::guard::validate_command;

#[test]
fn allows_ordinary_commands() {
    assert!(validate_command("echo hello").is_ok());
    assert!(validate_command("rm -rf ./build").is_ok());
}

#[test]
fn blocks_fork_bomb() {
    assert!(validate_command(":(){ :|:& };:").is_err());
}

#[test]
fn blocks_mkfs() {
    assert!(validate_command("mkfs.ext4 /dev/sda1").is_err());
}

#[test]
fn blocks_dd_to_block_device() {
    assert!(validate_command("dd if=/dev/zero of=/dev/sda").is_err());
}

#[test]
fn blocks_recursive_rm_on_root() {
    assert!(validate_command("rm -rf /").is_err());
    assert!(validate_command("rm -rf /*").is_err());
}

#[test]
fn blocks_recursive_rm_after_chain() {
    assert!(validate_command("cd /tmp && rm -rf /etc").is_err());
}

#[test]
fn blocks_recursive_chmod_on_protected_path() {
    assert!(validate_command("chmod -R 777 /usr").is_err());
}

#[test]
fn allows_recursive_rm_on_unprotected_path() {
    assert!(validate_command("rm -rf /workspace/build").is_ok());
}
