use assert_cmd::prelude::*;
use secp256k1::{Keypair, Message, Secp256k1};
use sha2::{Digest, Sha256};
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    fs::write(&env_path, "VERIFY_SIG=1\nBUNDLE_DELAY_MS=0\n").unwrap();
    env_path.to_str().unwrap().to_string()
}

fn signed_event_json(created_at: u64, tags: Vec<Vec<String>>, content: &str) -> serde_json::Value {
    let secp = Secp256k1::new();
    let sk = [1u8; 32];
    let kp = Keypair::from_seckey_slice(&secp, &sk).unwrap();
    let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
    let kind = 1u32;
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr).unwrap();
    let hash = Sha256::digest(&data);
    let id = hex::encode(hash);
    let msg = Message::from_digest_slice(&hash).unwrap();
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
    serde_json::json!({
        "id": id,
        "pubkey": pubkey,
        "kind": kind,
        "created_at": created_at,
        "tags": tags,
        "content": content,
        "sig": hex::encode(sig.as_ref()),
    })
}

/// A root and a reply to it, as a JSON array file.
fn write_thread(dir: &TempDir) -> (String, String, String) {
    let root = signed_event_json(1, vec![], "root");
    let root_id = root["id"].as_str().unwrap().to_string();
    let reply = signed_event_json(
        2,
        vec![vec!["e".into(), root_id.clone(), "".into(), "root".into()]],
        "reply",
    );
    let reply_id = reply["id"].as_str().unwrap().to_string();
    let ev_path = dir.path().join("thread.json");
    fs::write(&ev_path, serde_json::to_string(&vec![root, reply]).unwrap()).unwrap();
    (ev_path.to_str().unwrap().to_string(), root_id, reply_id)
}

#[test]
fn ingest_counts_signed_events() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let (events, _, _) = write_thread(&dir);

    let out = Command::cargo_bin("notegraph")
        .unwrap()
        .args(["--env", &env_path, "ingest", &events])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8(out.stdout).unwrap().trim(),
        "consumed=2 skipped=0 notes=2 users=1"
    );
}

#[test]
fn thread_prints_root_first() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let (events, root_id, reply_id) = write_thread(&dir);

    let out = Command::cargo_bin("notegraph")
        .unwrap()
        .args(["--env", &env_path, "thread", &reply_id, &events])
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec![root_id.as_str(), reply_id.as_str()]);
}

#[test]
fn verify_fails_on_tampered_events() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let (events, _, _) = write_thread(&dir);

    Command::cargo_bin("notegraph")
        .unwrap()
        .args(["--env", &env_path, "verify", "--sample", "10", &events])
        .assert()
        .success()
        .stdout("verified=2\n");

    let mut ev = signed_event_json(3, vec![], "honest");
    ev["content"] = serde_json::json!("forged");
    let bad = dir.path().join("bad.json");
    fs::write(&bad, serde_json::to_string(&ev).unwrap()).unwrap();

    Command::cargo_bin("notegraph")
        .unwrap()
        .args(["--env", &env_path, "verify", bad.to_str().unwrap()])
        .assert()
        .failure();
}
