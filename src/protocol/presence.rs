//! Presence message bodies (spec.md §4.3): `agentInfo` online/offline
//! payloads, the LWT payload (same shape as the offline `agentInfo`), and
//! the `classInfo` descriptor for the single synthetic `Session` class this
//! agent exposes. Pure message construction; the actual retained publish
//! calls and LWT registration live in `agent::connection`.

use serde_json::json;

pub const PROTOCOL_VERSION: u64 = 3;
pub const SESSION_CLASS: &str = "Session";

pub fn agent_online_payload(hostname: &str, version: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "status": "online",
        "hostname": hostname,
        "version": version,
        "v": PROTOCOL_VERSION,
    }))
    .expect("agentInfo payload always serializes")
}

/// Used both for the graceful-shutdown publish and the LWT payload handed to
/// the broker before connecting (spec.md §4.3); they must be identical so a
/// late subscriber can't tell an ungraceful exit from a clean one.
pub fn agent_offline_payload(hostname: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "status": "offline",
        "hostname": hostname,
        "v": PROTOCOL_VERSION,
    }))
    .expect("agentInfo payload always serializes")
}

pub fn class_info_payload(instances: &[String], functions: &[String]) -> Vec<u8> {
    let mut static_functions = vec![
        "__createShared__".to_string(),
        "__delete__".to_string(),
        "call".to_string(),
    ];
    static_functions.extend(functions.iter().cloned());

    let mut member_functions = vec!["call".to_string()];
    member_functions.extend(functions.iter().cloned());

    serde_json::to_vec(&json!({
        "className": SESSION_CLASS,
        "instances": instances,
        "staticFunctions": static_functions,
        "memberFunctions": member_functions,
        "meta": serde_json::Value::Null,
        "v": PROTOCOL_VERSION,
    }))
    .expect("classInfo payload always serializes")
}
