use std::sync::LazyLock;

/// Version of the software as reported in logs and @PG records.
pub static VERSION: LazyLock<String> = LazyLock::new(|| env!("CARGO_PKG_VERSION").to_string());
