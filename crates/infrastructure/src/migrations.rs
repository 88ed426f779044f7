use sqlx::migrate::Migrator;

/// 嵌入式迁移，启动时执行
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
