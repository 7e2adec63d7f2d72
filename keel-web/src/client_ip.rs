//! 客户端 IP 中间件
//!
//! 直连地址属于受信任代理时，按配置的请求头顺序读取转发地址；结果以 `client-ip`
//! 属性保存（类型为 [`IpAddr`]）。

use std::net::IpAddr;
use std::str::FromStr;

use keel_core::{Environment, Value};

use crate::constants::*;
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};

/// IP 网段（单个地址视为全长前缀）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, normalize(*ip)) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                prefix_matches(u32::from(network).into(), u32::from(ip).into(), self.prefix, 32)
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                prefix_matches(u128::from(network), u128::from(ip), self.prefix, 128)
            }
            _ => false,
        }
    }
}

impl FromStr for IpRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = match s.trim().split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (s.trim(), None),
        };
        let network = IpAddr::from_str(address).map_err(|e| format!("{}: {}", s, e))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(prefix) => prefix
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("{}: invalid prefix length", s))?,
            None => max,
        };
        Ok(Self { network, prefix })
    }
}

fn prefix_matches(network: u128, ip: u128, prefix: u8, width: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = u32::from(width - prefix);
    (network >> shift) == (ip >> shift)
}

/// IPv4 映射的 IPv6 地址按 IPv4 处理
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        other => other,
    }
}

/// 代理配置
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub trusted: Vec<IpRange>,
    pub headers: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            trusted: Vec::new(),
            headers: ["Forwarded", "X-Forwarded-For", "X-Real-Ip", "Client-Ip"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

impl ProxyConfig {
    /// 从 Environment 加载，无法解析的网段记录警告后忽略
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        let headers: Vec<&str> = defaults.headers.iter().map(String::as_str).collect();

        let trusted = env
            .get_string_array_or(PROXIES_TRUSTED, &[])
            .iter()
            .filter_map(|entry| match entry.parse::<IpRange>() {
                Ok(range) => Some(range),
                Err(e) => {
                    tracing::warn!(entry = %entry, error = %e, "Ignoring invalid trusted proxy");
                    None
                }
            })
            .collect();

        Self {
            trusted,
            headers: env.get_string_array_or(PROXIES_HEADERS, &headers),
        }
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted.iter().any(|range| range.contains(ip))
    }
}

pub struct ClientIpMiddleware {
    config: ProxyConfig,
}

impl ClientIpMiddleware {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// 计算客户端地址
    pub fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        let remote = request.remote_addr().map(|addr| normalize(addr.ip()));

        match remote {
            Some(remote) if self.config.is_trusted(&remote) => {
                Some(self.forwarded_ip(request).unwrap_or(remote))
            }
            Some(remote) => Some(remote),
            // 没有连接信息（例如测试或内部调用）
            None => None,
        }
    }

    fn forwarded_ip(&self, request: &Request) -> Option<IpAddr> {
        self.config.headers.iter().find_map(|name| {
            let value = request.header(name)?;
            let candidates: Vec<IpAddr> = if name.eq_ignore_ascii_case("forwarded") {
                parse_forwarded(&value)
            } else {
                value.split(',').filter_map(parse_ip).collect()
            };
            // 从右向左跳过受信任代理
            candidates
                .iter()
                .rev()
                .find(|ip| !self.config.is_trusted(ip))
                .or_else(|| candidates.first())
                .copied()
        })
    }
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(normalize(ip));
    }
    // `[v6]:port` 或 `v4:port`
    let host = match value.strip_prefix('[') {
        Some(rest) => rest.split(']').next()?,
        None => value.rsplit_once(':').map(|(host, _)| host)?,
    };
    host.parse::<IpAddr>().ok().map(normalize)
}

/// RFC 7239 `Forwarded: for=1.2.3.4;proto=http, for="[::1]"`
fn parse_forwarded(value: &str) -> Vec<IpAddr> {
    value
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("for"))
        .filter_map(|(_, value)| parse_ip(value))
        .collect()
}

impl Middleware for ClientIpMiddleware {
    fn name(&self) -> &str {
        "client_ip"
    }

    fn process(&self, mut request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        if let Some(ip) = self.client_ip(&request) {
            tracing::trace!(client_ip = %ip, "Client address resolved");
            request.set_attribute(CLIENT_IP_ATTRIBUTE, Value::of(ip));
        }
        next.run(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn middleware() -> ClientIpMiddleware {
        ClientIpMiddleware::new(ProxyConfig {
            trusted: vec!["10.0.0.0/8".parse().unwrap(), "::1".parse().unwrap()],
            ..ProxyConfig::default()
        })
    }

    fn from(addr: &str) -> Request {
        Request::get("/").with_remote_addr(addr.parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn test_ranges() {
        let range: IpRange = "172.16.0.0/12".parse().unwrap();
        assert!(range.contains(&"172.20.1.1".parse().unwrap()));
        assert!(!range.contains(&"172.32.0.1".parse().unwrap()));
        assert!(!range.contains(&"::1".parse().unwrap()));
        assert!("10.0.0.0/33".parse::<IpRange>().is_err());
    }

    #[test]
    fn test_untrusted_remote_ignores_headers() {
        let request = from("203.0.113.9:4000").with_header("x-forwarded-for", "1.1.1.1");
        assert_eq!(
            middleware().client_ip(&request),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn test_trusted_proxy_uses_forwarded_for() {
        let request =
            from("10.1.2.3:4000").with_header("x-forwarded-for", "198.51.100.7, 10.0.0.5");
        assert_eq!(
            middleware().client_ip(&request),
            Some("198.51.100.7".parse().unwrap())
        );
    }

    #[test]
    fn test_forwarded_header_wins_by_order() {
        let request = from("[::1]:4000")
            .with_header("forwarded", "for=\"[2001:db8::1]:80\";proto=https")
            .with_header("x-real-ip", "198.51.100.7");
        assert_eq!(
            middleware().client_ip(&request),
            Some("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn test_attribute_is_set() {
        let pipeline = crate::pipeline::Pipeline::new().with(middleware()).with(
            crate::pipeline::middleware_fn("ip", |request: Request, _next| {
                let ip = request
                    .attribute_as::<IpAddr>(CLIENT_IP_ATTRIBUTE)
                    .map(|ip| ip.to_string())
                    .unwrap_or_default();
                Ok(Response::text(ip))
            }),
        );
        let response = pipeline.handle(from("127.0.0.1:1")).unwrap();
        assert_eq!(response.body_text(), "127.0.0.1");
    }
}
