use sis_sync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const TOUCHED_VARS: &[&str] = &[
    "SIS_SYNC_PROFILE",
    "SIS_SYNC_API_BIND_ADDR",
    "SIS_SYNC_LOG_LEVEL",
    "SIS_SYNC_OPERATOR_TOKEN",
    "SIS_SYNC_OPERATOR_TOKENS",
    "SIS_SYNC_MAX_RETRIES",
    "SIS_SYNC_INCREMENTAL_CRON",
    "SIS_SYNC_WORKER_CONCURRENCY",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for key in TOUCHED_VARS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.scheduler.incremental_cron, "0 */30 * * * *");
    assert_eq!(cfg.sync.full_sync_interval_minutes, 240);
    assert_eq!(cfg.sync.incremental_sync_interval_minutes, 30);
    assert!(cfg.operator_tokens.is_empty());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "SIS_SYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "SIS_SYNC_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "SIS_SYNC_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "SIS_SYNC_PROFILE=test\nSIS_SYNC_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "SIS_SYNC_API_BIND_ADDR=127.0.0.1:3000\nSIS_SYNC_MAX_RETRIES=7\n",
    );

    unsafe {
        env::set_var("SIS_SYNC_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.client.max_retries, 7);

    clear_env();
}

#[test]
fn operator_tokens_accept_comma_separated_list() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("SIS_SYNC_OPERATOR_TOKENS", "alpha, beta,,gamma");
    }

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader(&temp_dir).load().unwrap();
    assert_eq!(cfg.operator_tokens, vec!["alpha", "beta", "gamma"]);

    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("alpha"));
    assert!(redacted.contains("[REDACTED]"));

    clear_env();
}

#[test]
fn non_local_profile_requires_operator_token() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("SIS_SYNC_PROFILE", "production");
    }

    let temp_dir = TempDir::new().unwrap();
    let err = loader(&temp_dir).load().expect_err("tokens are required");
    assert!(matches!(err, ConfigError::MissingOperatorTokens));

    unsafe {
        env::set_var("SIS_SYNC_OPERATOR_TOKEN", "prod-token");
    }
    let cfg = loader(&temp_dir).load().unwrap();
    assert_eq!(cfg.operator_tokens, vec!["prod-token"]);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("SIS_SYNC_API_BIND_ADDR", "not-an-addr");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));
    clear_env();

    unsafe {
        env::set_var("SIS_SYNC_INCREMENTAL_CRON", "every half hour");
    }
    let err = loader(&temp_dir).load().expect_err("invalid cron should fail");
    assert!(matches!(err, ConfigError::InvalidCronExpression { .. }));
    clear_env();

    unsafe {
        env::set_var("SIS_SYNC_WORKER_CONCURRENCY", "lots");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("non-numeric concurrency should fail");
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key.contains("WORKER_CONCURRENCY")));

    clear_env();
}
