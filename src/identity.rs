//! Derives the identity fields of spec.md §3: the stable `client_id` and,
//! when the operator doesn't supply one, the `agent_name`, from host facts
//! probed once at startup (spec.md §6).
//!
//! `std::hash::Hash`'s `DefaultHasher` is explicitly *not* guaranteed stable
//! across Rust versions or process runs (it's randomly seeded), so identity
//! hashing here uses a fixed FNV-1a 64-bit implementation instead, the same
//! problem the original C++ agent had with `std::hash<std::string>`, which
//! spec.md §9 calls out as non-portable.

use std::path::PathBuf;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_64(input: &str) -> u64 {
    input
        .bytes()
        .fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

/// First `digits` characters of the hash's natural decimal form, zero-padded
/// to 20 digits first so a short `client_id` suffix never happens. `path_id`
/// wants the most-significant digits of the hash as-is (no left-pad, per
/// SPEC_FULL §3), so it calls `first_decimal_digits` directly instead.
fn decimal_prefix_padded(hash: u64, digits: usize) -> String {
    let padded = format!("{hash:020}");
    padded[..digits.min(padded.len())].to_string()
}

fn first_decimal_digits(hash: u64, digits: usize) -> String {
    let decimal = hash.to_string();
    decimal[..digits.min(decimal.len())].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub client_id: String,
    pub agent_name: String,
    pub hostname: String,
    pub platform: &'static str,
}

impl AgentIdentity {
    /// `agent` is `Options.agent` (spec.md §3): when present it both names
    /// the agent and seeds `client_id`; when absent, a generated
    /// `agent_name` is used for both.
    pub fn derive(domain: &str, agent: Option<&str>) -> Self {
        let hostname = current_hostname();
        let platform = current_platform();
        let agent_name = match agent {
            Some(name) => name.to_string(),
            None => generate_agent_name(&current_username(), &current_executable_path(), &hostname, platform),
        };
        let client_id = generate_client_id(domain, agent.unwrap_or(&agent_name));
        Self {
            client_id,
            agent_name,
            hostname,
            platform,
        }
    }
}

fn generate_agent_name(username: &str, exe_path: &str, hostname: &str, platform: &str) -> String {
    let path_id = first_decimal_digits(fnv1a_64(exe_path), 4);
    format!("{username}-{path_id}@{hostname}-{platform}-r")
}

fn generate_client_id(domain: &str, agent: &str) -> String {
    let mut combined = String::with_capacity(domain.len() + agent.len());
    combined.push_str(domain);
    combined.push_str(agent);
    format!("va3{}", decimal_prefix_padded(fnv1a_64(&combined), 20))
}

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

fn current_executable_path() -> String {
    std::env::current_exe()
        .map(|p: PathBuf| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| current_hostname())
}

fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "windows" => "win32",
        "macos" => "darwin",
        "linux" => "linux",
        "freebsd" => "freebsd",
        _ if cfg!(unix) => "unix",
        _ => "other",
    }
}
