// Hub MQTT topic names
//
// Requests carry a `$rid` request id in the topic's query string; the hub
// echoes it on the matching response topic along with the twin `$version`.

use url::form_urlencoded;

pub(crate) const TWIN_RESPONSES: &str = "$iothub/twin/res/#";
pub(crate) const DESIRED_PATCHES: &str = "$iothub/twin/PATCH/properties/desired/#";
pub(crate) const METHOD_CALLS: &str = "$iothub/methods/POST/#";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const DESIRED_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHOD_CALL_PREFIX: &str = "$iothub/methods/POST/";

pub(crate) fn twin_get(rid: &str) -> String {
    format!("$iothub/twin/GET/?$rid={rid}")
}

pub(crate) fn reported_patch(rid: &str) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
}

pub(crate) fn method_response(status: u16, rid: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={rid}")
}

pub(crate) fn telemetry(device_id: &str) -> String {
    format!("devices/{device_id}/messages/events/")
}

/// Classified inbound topic.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    TwinResponse {
        status: u16,
        rid: Option<String>,
        version: Option<i64>,
    },
    DesiredPatch {
        version: Option<i64>,
    },
    MethodCall {
        name: String,
        rid: Option<String>,
    },
    Unknown,
}

pub(crate) fn classify(topic: &str) -> Inbound {
    if let Some(rest) = topic.strip_prefix(TWIN_RESPONSE_PREFIX) {
        let (segment, query) = split_query(rest);
        let Ok(status) = segment.parse::<u16>() else {
            return Inbound::Unknown;
        };
        let params = Params::parse(query);
        return Inbound::TwinResponse {
            status,
            rid: params.rid,
            version: params.version,
        };
    }

    if let Some(rest) = topic.strip_prefix(DESIRED_PATCH_PREFIX) {
        let (_, query) = split_query(rest);
        return Inbound::DesiredPatch {
            version: Params::parse(query).version,
        };
    }

    if let Some(rest) = topic.strip_prefix(METHOD_CALL_PREFIX) {
        let (name, query) = split_query(rest);
        if name.is_empty() {
            return Inbound::Unknown;
        }
        return Inbound::MethodCall {
            name: name.to_owned(),
            rid: Params::parse(query).rid,
        };
    }

    Inbound::Unknown
}

/// Split `"{segment}/?{query}"` into its segment and query.
fn split_query(rest: &str) -> (&str, &str) {
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    (path.trim_end_matches('/'), query)
}

#[derive(Default)]
struct Params {
    rid: Option<String>,
    version: Option<i64>,
}

impl Params {
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            match k.as_ref() {
                "$rid" => params.rid = Some(v.into_owned()),
                "$version" => params.version = v.parse().ok(),
                _ => {}
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn twin_response_carries_status_rid_and_version() {
        assert_eq!(
            classify("$iothub/twin/res/204/?$rid=7&$version=12"),
            Inbound::TwinResponse {
                status: 204,
                rid: Some("7".into()),
                version: Some(12),
            }
        );
    }

    #[test]
    fn twin_get_response_has_no_version() {
        assert_eq!(
            classify("$iothub/twin/res/200/?$rid=1"),
            Inbound::TwinResponse {
                status: 200,
                rid: Some("1".into()),
                version: None,
            }
        );
    }

    #[test]
    fn desired_patch_version_is_parsed() {
        assert_eq!(
            classify("$iothub/twin/PATCH/properties/desired/?$version=5"),
            Inbound::DesiredPatch { version: Some(5) }
        );
        assert_eq!(
            classify("$iothub/twin/PATCH/properties/desired/"),
            Inbound::DesiredPatch { version: None }
        );
    }

    #[test]
    fn method_call_name_and_rid() {
        assert_eq!(
            classify("$iothub/methods/POST/reboot/?$rid=ab1"),
            Inbound::MethodCall {
                name: "reboot".into(),
                rid: Some("ab1".into()),
            }
        );
    }

    #[test]
    fn unrelated_topics_are_unknown() {
        assert_eq!(classify("devices/d/messages/devicebound/x"), Inbound::Unknown);
        assert_eq!(classify("$iothub/twin/res/abc/?$rid=1"), Inbound::Unknown);
        assert_eq!(classify("$iothub/methods/POST/?$rid=1"), Inbound::Unknown);
    }

    #[test]
    fn outbound_topics() {
        assert_eq!(twin_get("3"), "$iothub/twin/GET/?$rid=3");
        assert_eq!(
            reported_patch("4"),
            "$iothub/twin/PATCH/properties/reported/?$rid=4"
        );
        assert_eq!(method_response(501, "x"), "$iothub/methods/res/501/?$rid=x");
        assert_eq!(telemetry("dev1"), "devices/dev1/messages/events/");
    }
}
