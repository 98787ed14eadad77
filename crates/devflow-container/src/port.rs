//! ポート割り当て
//!
//! 1回の実行の中でポートが衝突しないよう、予約済みポートを集合で管理します。
//! 予約は単調に増えるだけで、解放はしません。

use crate::error::{ContainerError, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::TcpListener;
use std::process::Command;
use tracing::debug;

/// ランダム割り当ての最大試行回数
const MAX_RANDOM_ATTEMPTS: usize = 100;

/// ポート割り当て器
#[derive(Debug, Default)]
pub struct PortAllocator {
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定ポートを予約
    ///
    /// 0 は範囲外、既に予約済みのポートはエラー。
    pub fn reserve(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(ContainerError::PortOutOfRange(0));
        }

        let mut reserved = self.reserved.lock();
        if !reserved.insert(port) {
            return Err(ContainerError::PortAlreadyReserved(port));
        }
        debug!(port, "Port reserved");
        Ok(())
    }

    /// OSに空きポートを問い合わせて予約
    ///
    /// 予約済みのポートが返ってきた場合は再試行します。
    pub fn allocate_random(&self) -> Result<u16> {
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let port = find_free_port()?;

            let mut reserved = self.reserved.lock();
            if reserved.insert(port) {
                debug!(port, "Random port allocated");
                return Ok(port);
            }
        }

        Err(ContainerError::PortAllocationFailed(format!(
            "{}回試行しましたが予約済みのポートしか得られませんでした",
            MAX_RANDOM_ATTEMPTS
        )))
    }

    pub fn contains(&self, port: u16) -> bool {
        self.reserved.lock().contains(&port)
    }

    /// 予約済みポート一覧（昇順）
    pub fn reserved(&self) -> Vec<u16> {
        self.reserved.lock().iter().copied().collect()
    }
}

/// 127.0.0.1:0 にbindしてOSが割り当てたポートを取得
fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| {
        ContainerError::PortAllocationFailed(format!("ランダムポートへのbindに失敗: {}", e))
    })?;

    let port = listener
        .local_addr()
        .map_err(|e| {
            ContainerError::PortAllocationFailed(format!("ローカルアドレスの取得に失敗: {}", e))
        })?
        .port();

    Ok(port)
}

/// 指定されたポートを使用しているプロセスの PID を取得する
pub fn find_pids_by_port(port: u16) -> Vec<i32> {
    // lsof -ti:{port} を実行
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-i:{}", port))
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<i32>().ok())
            .collect(),
        _ => vec![], // エラーまたは空の場合は占有プロセスなしとみなす
    }
}

/// ポートがローカルで既に使用されているか
pub fn is_port_in_use(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_reserve_rejects_zero() {
        let allocator = PortAllocator::new();
        assert!(matches!(
            allocator.reserve(0),
            Err(ContainerError::PortOutOfRange(0))
        ));
    }

    #[test]
    fn test_reserve_rejects_duplicate() {
        let allocator = PortAllocator::new();
        allocator.reserve(1347).unwrap();
        assert!(matches!(
            allocator.reserve(1347),
            Err(ContainerError::PortAlreadyReserved(1347))
        ));
        assert!(allocator.contains(1347));
    }

    #[test]
    fn test_allocate_random_returns_distinct_ports() {
        let allocator = PortAllocator::new();
        allocator.reserve(27217).unwrap();

        let ports: Vec<u16> = (0..20).map(|_| allocator.allocate_random().unwrap()).collect();
        let unique: HashSet<u16> = ports.iter().copied().collect();

        assert_eq!(unique.len(), ports.len());
        assert!(!ports.contains(&27217));
        assert!(ports.iter().all(|p| *p != 0));
        assert_eq!(allocator.reserved().len(), 21);
    }

    #[test]
    fn test_reserved_is_sorted() {
        let allocator = PortAllocator::new();
        allocator.reserve(6379).unwrap();
        allocator.reserve(1347).unwrap();
        allocator.reserve(5432).unwrap();
        assert_eq!(allocator.reserved(), vec![1347, 5432, 6379]);
    }

    #[test]
    fn test_is_port_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_in_use(port));
    }
}
