//! JA3 client fingerprint intelligence
//!
//! JA3 is an MD5 over selected TLS ClientHello fields. Distinct client
//! stacks (browsers, scripting runtimes, offensive tools) produce distinct
//! hashes even under an identical User-Agent header, which makes the
//! fingerprint useful both for tool identification and for catching
//! identity spoofing.

use std::collections::HashMap;

use crate::models::Severity;

/// Client software category behind a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ja3Category {
    Browser,
    Scripting,
    AttackTool,
    Bot,
    Proxy,
}

impl Ja3Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ja3Category::Browser => "browser",
            Ja3Category::Scripting => "scripting",
            Ja3Category::AttackTool => "attack_tool",
            Ja3Category::Bot => "bot",
            Ja3Category::Proxy => "proxy",
        }
    }
}

/// One known fingerprint
pub struct Ja3Entry {
    pub hash: &'static str,
    pub client_name: &'static str,
    pub category: Ja3Category,
    pub risk: Severity,
    pub description: &'static str,
    /// User-Agent substrings this client legitimately presents
    pub expected_ua: &'static [&'static str],
}

const JA3_TABLE: &[Ja3Entry] = &[
    // Scripting clients (high spoofing risk)
    Ja3Entry {
        hash: "e7d705a3286e19ea42f587b344ee6865",
        client_name: "Python requests 2.x",
        category: Ja3Category::Scripting,
        risk: Severity::High,
        description: "Standard Python HTTP client, common in API automation and exfiltration scripts",
        expected_ua: &["python-requests", "python-urllib3"],
    },
    Ja3Entry {
        hash: "b32309a26951912be7dba376398abc3b",
        client_name: "Python aiohttp",
        category: Ja3Category::Scripting,
        risk: Severity::High,
        description: "Async Python HTTP client used in high-throughput scraping",
        expected_ua: &["aiohttp", "python"],
    },
    Ja3Entry {
        hash: "282149a96f83e5e4e0b2c26c3c4efc43",
        client_name: "Python httpx",
        category: Ja3Category::Scripting,
        risk: Severity::High,
        description: "Modern Python HTTP client",
        expected_ua: &["python-httpx", "python"],
    },
    Ja3Entry {
        hash: "3b5074b1b5d032e5620f69f9f700ff0e",
        client_name: "Node.js https",
        category: Ja3Category::Scripting,
        risk: Severity::Medium,
        description: "Node.js native HTTPS stack",
        expected_ua: &["node", "axios", "got"],
    },
    Ja3Entry {
        hash: "d7a7a67e6a706ba3a3b8ce2e36c2a8e3",
        client_name: "Go net/http",
        category: Ja3Category::Scripting,
        risk: Severity::Medium,
        description: "Go standard HTTP client",
        expected_ua: &["Go-http-client", "go"],
    },
    // Attack tools
    Ja3Entry {
        hash: "51c64c77e60f3980eea90869b68c58a8",
        client_name: "Cobalt Strike Beacon",
        category: Ja3Category::AttackTool,
        risk: Severity::High,
        description: "Post-exploitation C2 framework",
        expected_ua: &[],
    },
    Ja3Entry {
        hash: "72a589da586844d7f0818ce684948eea",
        client_name: "Metasploit Framework",
        category: Ja3Category::AttackTool,
        risk: Severity::High,
        description: "Penetration testing framework, may indicate active exploitation",
        expected_ua: &[],
    },
    Ja3Entry {
        hash: "a0e9f5d64349fb13191bc781f81f42e1",
        client_name: "Mimikatz / Impacket",
        category: Ja3Category::AttackTool,
        risk: Severity::High,
        description: "Credential theft tooling",
        expected_ua: &[],
    },
    // Command-line tools
    Ja3Entry {
        hash: "456523fc94726331a4d5a2e1d40b2cd7",
        client_name: "curl",
        category: Ja3Category::Scripting,
        risk: Severity::Medium,
        description: "Command-line HTTP client",
        expected_ua: &["curl"],
    },
    Ja3Entry {
        hash: "9e10692f1b7f78228b2d4e424db3a98c",
        client_name: "wget",
        category: Ja3Category::Scripting,
        risk: Severity::Medium,
        description: "Command-line download tool",
        expected_ua: &["Wget"],
    },
    // Proxy / anonymization
    Ja3Entry {
        hash: "e7d70f5df5e3ddf3d1af4b1a0a38a3a1",
        client_name: "Tor Browser",
        category: Ja3Category::Proxy,
        risk: Severity::High,
        description: "Tor network browser, may hide exfiltration",
        expected_ua: &["Mozilla"],
    },
    // Bots & scanners
    Ja3Entry {
        hash: "b386946a5a44d1ddcc843bc75336dfce",
        client_name: "Scrapy Spider",
        category: Ja3Category::Bot,
        risk: Severity::Medium,
        description: "Python web scraping framework",
        expected_ua: &["Scrapy"],
    },
    Ja3Entry {
        hash: "19e29534fd49dd27d09234e639c4057e",
        client_name: "Headless Chrome (Puppeteer)",
        category: Ja3Category::Bot,
        risk: Severity::High,
        description: "Headless browser automation",
        expected_ua: &["HeadlessChrome", "Chrome"],
    },
    Ja3Entry {
        hash: "cd08e31494816f6d2f3d8a2d0c4ab314",
        client_name: "Selenium WebDriver",
        category: Ja3Category::Bot,
        risk: Severity::High,
        description: "Browser automation framework",
        expected_ua: &["Chrome", "Firefox"],
    },
    // Legitimate browser baselines
    Ja3Entry {
        hash: "773906b0efdefa24a7f2b8eb6985bf37",
        client_name: "Chrome 120+",
        category: Ja3Category::Browser,
        risk: Severity::Low,
        description: "Google Chrome, expected enterprise traffic",
        expected_ua: &["Chrome", "Mozilla"],
    },
    Ja3Entry {
        hash: "579ccef312d18482fc42e2b822ca2430",
        client_name: "Firefox 120+",
        category: Ja3Category::Browser,
        risk: Severity::Low,
        description: "Mozilla Firefox, expected enterprise traffic",
        expected_ua: &["Firefox", "Mozilla"],
    },
    Ja3Entry {
        hash: "b20b44b18b853f29d25660b022eb7350",
        client_name: "Edge 120+",
        category: Ja3Category::Browser,
        risk: Severity::Low,
        description: "Microsoft Edge (Chromium)",
        expected_ua: &["Edg", "Chrome", "Mozilla"],
    },
    Ja3Entry {
        hash: "a441a33aaee795f498d6b764cc78989a",
        client_name: "Safari 17+",
        category: Ja3Category::Browser,
        risk: Severity::Low,
        description: "Apple Safari",
        expected_ua: &["Safari", "AppleWebKit"],
    },
];

const BROWSER_UA_MARKERS: &[&str] = &["chrome", "firefox", "safari", "edge", "mozilla"];

/// Spoofing analysis result: the UA claims a browser while the TLS
/// fingerprint identifies something else.
#[derive(Debug, Clone)]
pub struct SpoofingVerdict {
    pub ja3_client: &'static str,
    pub ja3_category: Ja3Category,
    pub claimed_ua: String,
}

/// Hash-indexed fingerprint database.
pub struct Ja3Db {
    index: HashMap<&'static str, &'static Ja3Entry>,
}

impl Ja3Db {
    pub fn new() -> Self {
        Self {
            index: JA3_TABLE.iter().map(|e| (e.hash, e)).collect(),
        }
    }

    pub fn lookup(&self, hash: &str) -> Option<&'static Ja3Entry> {
        if hash.len() != 32 {
            return None;
        }
        self.index.get(hash).copied()
    }

    /// Known offensive tool fingerprint.
    pub fn is_attack_tool(&self, hash: &str) -> bool {
        self.lookup(hash)
            .map(|e| e.category == Ja3Category::AttackTool)
            .unwrap_or(false)
    }

    /// Detect a User-Agent / JA3 mismatch. A request claiming to be a
    /// browser while the handshake fingerprint belongs to a scripting
    /// client or tool is treated as identity spoofing.
    pub fn detect_spoofing(&self, hash: &str, user_agent: &str) -> Option<SpoofingVerdict> {
        let entry = self.lookup(hash)?;
        if user_agent.is_empty() || entry.category == Ja3Category::Browser {
            return None;
        }

        let ua_lower = user_agent.to_ascii_lowercase();
        let claims_browser = BROWSER_UA_MARKERS.iter().any(|m| ua_lower.contains(m));
        if !claims_browser {
            return None;
        }

        // Some non-browser clients legitimately carry Mozilla-prefixed UAs
        // (e.g. Tor); only flag when none of the expected patterns is a
        // browser string.
        let expected_has_browser = entry
            .expected_ua
            .iter()
            .any(|pat| BROWSER_UA_MARKERS.iter().any(|m| pat.to_ascii_lowercase().contains(m)));
        if expected_has_browser {
            return None;
        }

        Some(SpoofingVerdict {
            ja3_client: entry.client_name,
            ja3_category: entry.category,
            claimed_ua: user_agent.chars().take(100).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for Ja3Db {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical fingerprint of Python requests, used by tests and the
/// synthetic traffic generator.
pub const PYTHON_REQUESTS_JA3: &str = "e7d705a3286e19ea42f587b344ee6865";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_hash() {
        let db = Ja3Db::new();
        let entry = db.lookup(PYTHON_REQUESTS_JA3).unwrap();
        assert_eq!(entry.client_name, "Python requests 2.x");
        assert_eq!(entry.category, Ja3Category::Scripting);
    }

    #[test]
    fn rejects_malformed_hash() {
        let db = Ja3Db::new();
        assert!(db.lookup("deadbeef").is_none());
    }

    #[test]
    fn spoofing_detected_for_python_claiming_chrome() {
        let db = Ja3Db::new();
        let verdict = db
            .detect_spoofing(PYTHON_REQUESTS_JA3, "Mozilla/5.0 (Windows NT 10.0) Chrome/120.0")
            .unwrap();
        assert_eq!(verdict.ja3_client, "Python requests 2.x");
    }

    #[test]
    fn no_spoofing_for_honest_python_ua() {
        let db = Ja3Db::new();
        assert!(db
            .detect_spoofing(PYTHON_REQUESTS_JA3, "python-requests/2.31.0")
            .is_none());
    }

    #[test]
    fn no_spoofing_for_real_browser() {
        let db = Ja3Db::new();
        assert!(db
            .detect_spoofing("773906b0efdefa24a7f2b8eb6985bf37", "Mozilla/5.0 Chrome/120.0")
            .is_none());
    }

    #[test]
    fn tor_mozilla_ua_is_not_spoofing() {
        let db = Ja3Db::new();
        // Tor's expected UA patterns include "Mozilla", so a Mozilla UA is
        // consistent with the fingerprint.
        assert!(db
            .detect_spoofing("e7d70f5df5e3ddf3d1af4b1a0a38a3a1", "Mozilla/5.0 Firefox/115.0")
            .is_none());
    }

    #[test]
    fn attack_tool_flagging() {
        let db = Ja3Db::new();
        assert!(db.is_attack_tool("51c64c77e60f3980eea90869b68c58a8"));
        assert!(!db.is_attack_tool(PYTHON_REQUESTS_JA3));
    }
}
