use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::NamedTempFile;

use rookdb::common::config::EngineConfig;
use rookdb::storage::buffer::BufferPoolManager;
use rookdb::storage::disk::DiskManager;
use rookdb::transaction::wal::log_manager::LogManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<NamedTempFile> {
    Ok(NamedTempFile::new()?)
}

// Create a buffer pool manager over a temporary database, logging disabled
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let file = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk));
    Ok((buffer_pool, file))
}

// Create a full logged engine: disk, running log manager, buffer pool
#[allow(dead_code)]
pub fn create_logged_engine(
    pool_size: usize,
    log_buffer_size: usize,
) -> Result<(
    Arc<DiskManager>,
    Arc<LogManager>,
    Arc<BufferPoolManager>,
    NamedTempFile,
)> {
    let config = EngineConfig {
        pool_size,
        log_buffer_size,
        log_timeout: Duration::from_millis(40),
        ..EngineConfig::default()
    };
    let file = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(file.path())?);
    let log_manager = Arc::new(LogManager::with_config(disk.clone(), &config));
    log_manager.run_flush_thread();
    let buffer_pool = Arc::new(BufferPoolManager::with_config(
        &config,
        disk.clone(),
        Some(log_manager.clone()),
    ));
    Ok((disk, log_manager, buffer_pool, file))
}

// Reopen the engine over an existing database file, as after a restart
#[allow(dead_code)]
pub fn reopen_engine(
    file: &NamedTempFile,
    pool_size: usize,
) -> Result<(Arc<DiskManager>, Arc<BufferPoolManager>)> {
    let disk = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk.clone()));
    Ok((disk, buffer_pool))
}
