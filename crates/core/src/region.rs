//! Per-region platform endpoints.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionEndpoints {
    /// Web messaging socket. Government regions do not offer one.
    pub websocket: Option<&'static str>,
    pub auth: &'static str,
    pub api: &'static str,
}

const REGIONS: &[(&str, RegionEndpoints)] = &[
    (
        "us-east-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.mypurecloud.com/v1"),
            auth: "https://login.mypurecloud.com",
            api: "https://api.mypurecloud.com",
        },
    ),
    (
        "us-east-2",
        RegionEndpoints {
            websocket: None,
            auth: "https://login.use2.us-gov-pure.cloud",
            api: "https://api.use2.us-gov-pure.cloud",
        },
    ),
    (
        "us-west-2",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.usw2.pure.cloud/v1"),
            auth: "https://login.usw2.pure.cloud",
            api: "https://api.usw2.pure.cloud",
        },
    ),
    (
        "ca-central-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.cac1.pure.cloud/v1"),
            auth: "https://login.cac1.pure.cloud",
            api: "https://api.cac1.pure.cloud",
        },
    ),
    (
        "eu-west-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.mypurecloud.ie/v1"),
            auth: "https://login.mypurecloud.ie",
            api: "https://api.mypurecloud.ie",
        },
    ),
    (
        "eu-west-2",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.euw2.pure.cloud/v1"),
            auth: "https://login.euw2.pure.cloud",
            api: "https://api.euw2.pure.cloud",
        },
    ),
    (
        "eu-central-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.mypurecloud.de/v1"),
            auth: "https://login.mypurecloud.de",
            api: "https://api.mypurecloud.de",
        },
    ),
    (
        "ap-south-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.aps1.pure.cloud/v1"),
            auth: "https://login.aps1.pure.cloud",
            api: "https://api.aps1.pure.cloud",
        },
    ),
    (
        "ap-northeast-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.mypurecloud.jp/v1"),
            auth: "https://login.mypurecloud.jp",
            api: "https://api.mypurecloud.jp",
        },
    ),
    (
        "ap-northeast-2",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.apne2.pure.cloud/v1"),
            auth: "https://login.apne2.pure.cloud",
            api: "https://api.apne2.pure.cloud",
        },
    ),
    (
        "ap-southeast-2",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.mypurecloud.com.au/v1"),
            auth: "https://login.mypurecloud.com.au",
            api: "https://api.mypurecloud.com.au",
        },
    ),
    (
        "sa-east-1",
        RegionEndpoints {
            websocket: Some("wss://webmessaging.sae1.pure.cloud/v1"),
            auth: "https://login.sae1.pure.cloud",
            api: "https://api.sae1.pure.cloud",
        },
    ),
];

pub fn endpoints_for(region: &str) -> Option<&'static RegionEndpoints> {
    let region = region.trim().to_ascii_lowercase();
    REGIONS.iter().find(|(name, _)| *name == region).map(|(_, endpoints)| endpoints)
}

pub fn known_regions() -> impl Iterator<Item = &'static str> {
    REGIONS.iter().map(|(name, _)| *name)
}

/// Endpoints a session actually talks to, after explicit overrides are applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub websocket: Option<String>,
    pub auth: Option<String>,
    pub api: Option<String>,
}
