use std::future::Future;
use std::time::Duration;

use itertools::Itertools;
use semver::Version;

use crate::errors::InstallError;

/// Runs `op` up to `attempts` times, sleeping `delay` between tries, and
/// returns the first success or the last error. Polling steps (PID probes,
/// replica status) express "not there yet" as an error so a single helper
/// covers both transient failures and awaited conditions.
pub async fn retry_with_fixed_delay<T, E, F, Fut>(attempts: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // attempts >= 1, so at least one op() ran and stored an error
    Err(last_err.expect("retry_with_fixed_delay called with zero attempts"))
}

/// Splits `host:port`, rejecting empty components and non-integer ports.
pub fn split_addr(addr: &str) -> Result<(String, u16), InstallError> {
    let (host, port_str) = addr
        .rsplit_once(':')
        .ok_or_else(|| InstallError::Validation(format!("addr must be formatted as host:port, {addr} is invalid")))?;

    if host.is_empty() || port_str.is_empty() {
        return Err(InstallError::Validation(format!(
            "addr must be formatted as host:port, {addr} is invalid"
        )));
    }

    let port = port_str
        .parse::<u16>()
        .map_err(|_| InstallError::Validation(format!("port number must be an integer in 1..65535, {port_str} is invalid")))?;
    if port == 0 {
        return Err(InstallError::Validation(format!(
            "port number must be an integer in 1..65535, {port_str} is invalid"
        )));
    }

    Ok((host.to_string(), port))
}

/// Validates and sorts addresses ascending by host then port. The first
/// address of the sorted list is the replication source.
pub fn sort_addrs(addrs: &[String]) -> Result<Vec<String>, InstallError> {
    let mut parsed = addrs
        .iter()
        .map(|addr| split_addr(addr).map(|(host, port)| (host, port)))
        .collect::<Result<Vec<_>, _>>()?;

    parsed.sort();

    Ok(parsed.into_iter().map(|(host, port)| format!("{host}:{port}")).collect())
}

pub fn join_addrs(addrs: &[String]) -> String {
    addrs.iter().join(",")
}

/// Parses version strings that may carry fewer than three components, the way
/// OS release files print them (`9.2`, `8.5.2111`). Missing components are
/// zero; a fourth component is dropped.
pub fn parse_lenient_version(raw: &str) -> Option<Version> {
    let mut parts = [0u64; 3];
    let mut count = 0;

    for (i, part) in raw.trim().split('.').enumerate() {
        if i >= 3 {
            break;
        }
        parts[i] = part.parse().ok()?;
        count += 1;
    }
    if count == 0 {
        return None;
    }

    Some(Version::new(parts[0], parts[1], parts[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let ret = retry_with_fixed_delay(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(ret, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let ret: Result<(), &str> = retry_with_fixed_delay(5, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still failing") }
        })
        .await;

        assert_eq!(ret, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_split_addr() {
        assert_eq!(split_addr("192.168.137.21:3306").unwrap(), ("192.168.137.21".to_string(), 3306));
        assert!(split_addr("192.168.137.21").is_err());
        assert!(split_addr(":3306").is_err());
        assert!(split_addr("host:").is_err());
        assert!(split_addr("host:abc").is_err());
        assert!(split_addr("host:0").is_err());
    }

    #[test]
    fn test_sort_addrs_source_is_minimum() {
        let addrs = vec![
            "192.168.137.21:3307".to_string(),
            "192.168.137.21:3306".to_string(),
            "192.168.137.11:3308".to_string(),
        ];
        let sorted = sort_addrs(&addrs).unwrap();
        assert_eq!(
            sorted,
            vec![
                "192.168.137.11:3308".to_string(),
                "192.168.137.21:3306".to_string(),
                "192.168.137.21:3307".to_string(),
            ]
        );
    }

    #[test]
    fn test_sort_addrs_rejects_invalid_member() {
        let addrs = vec!["192.168.137.21:3306".to_string(), "bogus".to_string()];
        assert!(sort_addrs(&addrs).is_err());
    }

    #[test]
    fn test_join_addrs() {
        let addrs = vec!["a:1".to_string(), "b:2".to_string()];
        assert_eq!(join_addrs(&addrs), "a:1,b:2");
    }

    #[test]
    fn test_parse_lenient_version() {
        assert_eq!(parse_lenient_version("9.2").unwrap(), Version::new(9, 2, 0));
        assert_eq!(parse_lenient_version("8.5.2111").unwrap(), Version::new(8, 5, 2111));
        assert_eq!(parse_lenient_version("8.5.2111.1").unwrap(), Version::new(8, 5, 2111));
        assert!(parse_lenient_version("core").is_none());
    }
}
