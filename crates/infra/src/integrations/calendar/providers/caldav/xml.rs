//! WebDAV request bodies and `multistatus` parsing.
//!
//! Elements are matched by local name so namespace prefixes chosen by the
//! server do not matter.

use calsync_domain::Result;
use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};

use super::ics::format_utc;
use crate::errors::InfraError;

pub const CURRENT_USER_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

pub const CALENDAR_HOME_SET: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

pub const CALENDAR_COLLECTIONS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <c:calendar-timezone/>
  </d:prop>
</d:propfind>"#;

/// `calendar-query` REPORT for VEVENTs overlapping `[start, end)`, with
/// recurring events expanded into instances by the server.
pub fn calendar_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let (start, end) = (format_utc(start), format_utc(end));
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data>
      <c:expand start="{start}" end="{end}"/>
    </c:calendar-data>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{start}" end="{end}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

/// `calendar-query` REPORT locating the resource that holds `uid`. Resource
/// names are chosen by whichever client created the event, so they cannot be
/// derived from the UID.
pub fn uid_query(uid: &str) -> String {
    let uid = escape(uid);
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:prop-filter name="UID">
          <c:text-match collation="i;octet">{uid}</c:text-match>
        </c:prop-filter>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Properties of one `<response>` found in successful propstats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResource {
    pub href: String,
    pub display_name: Option<String>,
    pub is_calendar: bool,
    pub calendar_timezone: Option<String>,
    pub principal_href: Option<String>,
    pub home_set_href: Option<String>,
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
}

fn is(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// All text under `node`, CDATA included, trimmed.
fn text_of(node: Node<'_, '_>) -> Option<String> {
    let text: String = node.descendants().filter(Node::is_text).filter_map(|n| n.text()).collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn nested_href(node: Node<'_, '_>) -> Option<String> {
    node.descendants().find(|n| is(n, "href")).and_then(text_of)
}

fn propstat_ok(propstat: Node<'_, '_>) -> bool {
    propstat
        .children()
        .find(|n| is(n, "status"))
        .and_then(text_of)
        .is_none_or(|status| status.contains(" 200"))
}

/// Parse a `207 Multi-Status` body.
pub fn parse_multistatus(body: &str) -> Result<Vec<DavResource>> {
    let doc = Document::parse(body).map_err(InfraError::from)?;
    let mut resources = Vec::new();

    for response in doc.descendants().filter(|n| is(n, "response")) {
        let Some(href) = response.children().find(|n| is(n, "href")).and_then(text_of) else {
            continue;
        };
        let mut resource = DavResource { href, ..DavResource::default() };

        for propstat in response.children().filter(|n| is(n, "propstat")) {
            if !propstat_ok(propstat) {
                continue;
            }
            let Some(prop) = propstat.children().find(|n| is(n, "prop")) else {
                continue;
            };
            for node in prop.children().filter(Node::is_element) {
                match node.tag_name().name() {
                    "displayname" => resource.display_name = text_of(node),
                    "resourcetype" => {
                        resource.is_calendar = node.children().any(|n| is(&n, "calendar"));
                    }
                    "calendar-timezone" => resource.calendar_timezone = text_of(node),
                    "current-user-principal" => resource.principal_href = nested_href(node),
                    "calendar-home-set" => resource.home_set_href = nested_href(node),
                    "getetag" => resource.etag = text_of(node),
                    "calendar-data" => resource.calendar_data = text_of(node),
                    _ => {}
                }
            }
        }
        resources.push(resource);
    }

    Ok(resources)
}
