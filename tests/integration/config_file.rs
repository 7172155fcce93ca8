use aodv_mesh::aodv::AODV;
use aodv_mesh::common::Address;
use aodv_mesh::config::AodvConfig;
use aodv_mesh::logging;
use std::env;
use std::fs;
use std::sync::Arc;

#[test]
fn node_from_config_file() {
    let dir = env::temp_dir().join("aodv_mesh_config_file_test");
    fs::create_dir_all(&dir).expect("Could not create test directory");
    let path = dir.join("node.toml");
    let data = r#"
local_address = "0014.4F01.0000.00AA"
net_diameter = 10
node_traversal_time = 20
end_node = true
random_seed = 12345
"#;
    fs::write(&path, data).expect("Could not write config file");

    let config = AodvConfig::from_file(&path)
        .expect("Could not read config file")
        .resolve()
        .expect("Invalid configuration");
    let _ = fs::remove_dir_all(&dir);

    assert_eq!(config.local_address, Address(0x0014_4F01_0000_00AA));
    assert_eq!(config.net_diameter, 10);
    assert_eq!(config.path_discovery_time, 2 * 2 * 20 * 10);
    assert!(config.end_node);

    let log_file = dir.join(logging::LOG_DIR_NAME).join("node.log");
    let logger = logging::create_logger(&log_file, false).expect("Could not create logger");
    let engine = AODV::new(config, Arc::new(super::NullTransport), logger);
    assert_eq!(engine.local_address(), config.local_address);
    assert!(!engine.lookup(Address(1)).is_valid());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_config_file_is_an_error() {
    let path = env::temp_dir().join("aodv_mesh_no_such_dir").join("node.toml");
    assert!(AodvConfig::from_file(&path).is_err());
}
