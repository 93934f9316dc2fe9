use std::io::Write as _;

use super::*;

fn seed(username: &str, name: &str) -> ChannelSeed {
    ChannelSeed {
        username: username.to_string(),
        name: name.to_string(),
        subscribers_count: 0,
        theme: None,
        verified: false,
    }
}

#[test]
fn handle_strips_at_sign() {
    assert_eq!(seed("@Tech_News", "Tech News").handle(), "tech_news");
}

#[test]
fn handle_strips_link_prefix() {
    assert_eq!(seed("https://t.me/crypto_daily", "Crypto").handle(), "crypto_daily");
    assert_eq!(seed("t.me/crypto_daily", "Crypto").handle(), "crypto_daily");
}

#[test]
fn validate_rejects_empty_name() {
    let file = ChannelsFile {
        channels: vec![seed("tech_news", "  ")],
    };
    let err = validate_channels(&file).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("non-empty")));
}

#[test]
fn validate_rejects_short_username() {
    let file = ChannelsFile {
        channels: vec![seed("abc", "Short")],
    };
    assert!(matches!(
        validate_channels(&file),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn validate_rejects_duplicate_handles_case_insensitive() {
    let file = ChannelsFile {
        channels: vec![seed("@Tech_News", "One"), seed("tech_news", "Two")],
    };
    let err = validate_channels(&file).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("duplicate")));
}

#[test]
fn validate_rejects_negative_subscribers() {
    let mut bad = seed("tech_news", "Tech");
    bad.subscribers_count = -1;
    let file = ChannelsFile {
        channels: vec![bad],
    };
    assert!(validate_channels(&file).is_err());
}

#[test]
fn load_channels_reads_yaml() {
    let dir = std::env::temp_dir().join(format!("tgnet-channels-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("channels.yaml");
    let mut file = std::fs::File::create(&path).expect("create file");
    writeln!(
        file,
        "channels:\n  - username: \"@world_news\"\n    name: World News\n    subscribers_count: 1200\n    theme: News\n  - username: markets_live\n    name: Markets Live\n    verified: true"
    )
    .expect("write yaml");

    let loaded = load_channels(&path).expect("valid file");
    assert_eq!(loaded.channels.len(), 2);
    assert_eq!(loaded.channels[0].handle(), "world_news");
    assert_eq!(loaded.channels[0].subscribers_count, 1200);
    assert!(loaded.channels[1].verified);
    assert_eq!(loaded.channels[1].subscribers_count, 0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_channels_missing_file_is_io_error() {
    let err = load_channels(Path::new("/definitely/not/here.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::ChannelsFileIo { .. }));
}
