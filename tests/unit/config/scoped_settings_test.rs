//! Global defaults and thread-scoped overrides

use crate::unit::common::*;
use velostream_kafka::velostream::config::BOOTSTRAP_SERVERS_ENV;

#[test]
#[serial]
fn test_global_update_seen_by_all_threads() {
    let original = config::global().bootstrap_servers;
    config::update_global(|s| s.bootstrap_servers = "global-test:9092".to_string());

    let seen = std::thread::spawn(|| config::current().bootstrap_servers)
        .join()
        .unwrap();
    assert_eq!(seen, "global-test:9092");

    config::update_global(|s| s.bootstrap_servers = original);
}

#[test]
#[serial]
fn test_scope_shadows_global_on_this_thread_only() {
    let scoped_settings = config::current().bootstrap_servers("scoped:1");
    config::with_settings(scoped_settings, || {
        assert_eq!(config::current().bootstrap_servers, "scoped:1");
        assert_ne!(config::global().bootstrap_servers, "scoped:1");

        let other = std::thread::spawn(|| config::current().bootstrap_servers)
            .join()
            .unwrap();
        assert_ne!(other, "scoped:1");
    });
}

#[test]
fn test_scope_restored_after_error_return() {
    let before = config::current().bootstrap_servers;
    let result: Result<(), String> = config::scoped(
        |s| s.bootstrap_servers = "failing:1".to_string(),
        || Err("body failed".to_string()),
    );
    assert!(result.is_err());
    assert_eq!(config::current().bootstrap_servers, before);
}

#[test]
fn test_guard_pops_on_drop() {
    let before = config::current().bootstrap_servers;
    {
        let _guard = config::enter(ClientSettings::default().bootstrap_servers("guarded:1"));
        assert_eq!(config::current().bootstrap_servers, "guarded:1");
    }
    assert_eq!(config::current().bootstrap_servers, before);
}

#[test]
#[serial]
fn test_from_env_reads_bootstrap_servers() {
    std::env::set_var(BOOTSTRAP_SERVERS_ENV, "env-host:19092");
    let settings = ClientSettings::from_env();
    std::env::remove_var(BOOTSTRAP_SERVERS_ENV);

    assert_eq!(settings.bootstrap_servers, "env-host:19092");
    assert_eq!(
        ClientSettings::from_env().bootstrap_servers,
        ClientSettings::default().bootstrap_servers
    );
}

#[test]
fn test_concurrent_scoped_deserializers_stay_apart() {
    let both_scoped = Arc::new(std::sync::Barrier::new(2));
    let codecs: Vec<Arc<dyn Deserializer>> = vec![Arc::new(StringCodec), Arc::new(RawCodec)];

    let handles: Vec<_> = codecs
        .into_iter()
        .map(|codec| {
            let both_scoped = Arc::clone(&both_scoped);
            let settings = config::current().deserializer(codec);
            std::thread::spawn(move || {
                config::with_settings(settings, || {
                    // Decode only once the other thread's scope is live too
                    both_scoped.wait();
                    config::current().deserializer.deserialize(Some(b"ok"))
                })
            })
        })
        .collect();

    let decoded: Vec<Value> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();
    assert_eq!(decoded, vec![Value::from("ok"), Value::Bytes(b"ok".to_vec())]);
}
