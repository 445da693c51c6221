//! iCalendar (RFC 5545) reading and writing for CalDAV resources.

use calsync_domain::{
    Attendee, AttendeeStatus, CalSyncError, EventStatus, EventTime, EventVisibility,
    ExternalEvent, NewEventData, Result,
};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::parser::{read_calendar, unfold, Component as ParsedComponent, Property};
use icalendar::{Calendar, CalendarDateTime, Component, DatePerhapsTime, EventLike, ValueType};
use tracing::warn;

use super::super::validate_and_log_email;

/// `YYYYMMDDTHHMMSSZ`, the form CalDAV time ranges and UTC DATE-TIMEs use.
pub fn format_utc(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `TZID` of the first VTIMEZONE in a `calendar-timezone` property value.
pub fn timezone_id(vtimezone: &str) -> Option<String> {
    unfold(vtimezone)
        .lines()
        .find_map(|line| line.trim().strip_prefix("TZID:").map(|tz| tz.trim().to_string()))
        .filter(|tz| !tz.is_empty())
}

/// Resolve a TZID against the tz database. Vendor-prefixed ids such as
/// `/mozilla.org/20050126_1/Europe/Berlin` are matched on their trailing
/// segments.
fn resolve_zone(tzid: &str) -> Option<Tz> {
    if let Ok(tz) = tzid.parse::<Tz>() {
        return Some(tz);
    }
    tzid.match_indices('/').find_map(|(idx, _)| tzid[idx + 1..].parse::<Tz>().ok())
}

fn localize(naive: NaiveDateTime, tzid: &str) -> EventTime {
    match resolve_zone(tzid) {
        Some(tz) => {
            let at = tz
                .from_local_datetime(&naive)
                .earliest()
                .map_or_else(|| naive.and_utc(), |local| local.with_timezone(&Utc));
            EventTime::timed(at, tz.name())
        }
        None => {
            warn!(tzid, "unknown iCalendar TZID; reading wall-clock time as UTC");
            EventTime::utc(naive.and_utc())
        }
    }
}

fn to_event_time(value: DatePerhapsTime, default_tz: Option<&str>) -> EventTime {
    match value {
        DatePerhapsTime::Date(date) => EventTime::all_day(date),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(at)) => EventTime::utc(at),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => match default_tz {
            Some(tz) => localize(naive, tz),
            None => EventTime::utc(naive.and_utc()),
        },
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            localize(date_time, &tzid)
        }
    }
}

/// RFC 5545 DURATION (`P1D`, `PT1H30M`, `-PT15M`, `P2W`).
fn parse_duration(raw: &str) -> Option<Duration> {
    let (negative, rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut in_time = false;
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            'T' => in_time = true,
            unit => {
                let amount: i64 = digits.parse().ok()?;
                digits.clear();
                total += match (unit, in_time) {
                    ('W', false) => Duration::weeks(amount),
                    ('D', false) => Duration::days(amount),
                    ('H', true) => Duration::hours(amount),
                    ('M', true) => Duration::minutes(amount),
                    ('S', true) => Duration::seconds(amount),
                    _ => return None,
                };
            }
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

fn add_duration(start: &EventTime, duration: Duration) -> EventTime {
    match start {
        EventTime::AllDay { date } => EventTime::all_day(*date + duration),
        EventTime::Timed { at, timezone } => EventTime::timed(*at + duration, timezone.clone()),
    }
}

/// Undo TEXT escaping (`\n`, `\,`, `\;`, `\\`).
fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn value<'a>(prop: &'a Property<'_>) -> &'a str {
    prop.val.as_ref()
}

fn text_prop(vevent: &ParsedComponent<'_>, name: &str) -> Option<String> {
    vevent
        .find_prop(name)
        .map(|prop| unescape_text(value(prop)))
        .filter(|text| !text.trim().is_empty())
}

fn param<'a>(prop: &'a Property<'_>, key: &str) -> Option<&'a str> {
    prop.params
        .iter()
        .find(|param| param.key == key)
        .and_then(|param| param.val.as_ref())
        .map(|val| val.as_ref())
}

fn parse_attendee(prop: &Property<'_>, event_id: &str) -> Option<Attendee> {
    let raw = value(prop);
    let address = raw
        .get(..7)
        .filter(|scheme| scheme.eq_ignore_ascii_case("mailto:"))
        .map_or(raw, |_| &raw[7..]);
    let email = validate_and_log_email(address, event_id)?;

    let status = param(prop, "PARTSTAT").and_then(|partstat| match partstat {
        "ACCEPTED" => Some(AttendeeStatus::Accepted),
        "DECLINED" => Some(AttendeeStatus::Declined),
        "TENTATIVE" => Some(AttendeeStatus::Tentative),
        "NEEDS-ACTION" => Some(AttendeeStatus::NeedsAction),
        _ => None,
    });

    Some(Attendee { email, name: param(prop, "CN").map(str::to_string), status })
}

fn collect_vevents<'a>(
    components: &'a [ParsedComponent<'a>],
    found: &mut Vec<&'a ParsedComponent<'a>>,
) {
    for component in components {
        if component.name == "VEVENT" {
            found.push(component);
        } else {
            collect_vevents(&component.components, found);
        }
    }
}

fn to_external(vevent: &ParsedComponent<'_>, default_tz: Option<&str>) -> Result<ExternalEvent> {
    let uid = vevent
        .find_prop("UID")
        .map(|prop| value(prop).to_string())
        .ok_or_else(|| CalSyncError::ProviderApi("VEVENT without UID".into()))?;

    let start = vevent
        .find_prop("DTSTART")
        .and_then(|prop| DatePerhapsTime::try_from(prop).ok())
        .map(|time| to_event_time(time, default_tz))
        .ok_or_else(|| CalSyncError::ProviderApi(format!("VEVENT {uid} has no usable DTSTART")))?;

    let end = match vevent.find_prop("DTEND").and_then(|prop| DatePerhapsTime::try_from(prop).ok())
    {
        Some(time) => to_event_time(time, default_tz),
        None => {
            let duration = vevent
                .find_prop("DURATION")
                .and_then(|prop| parse_duration(value(prop)))
                .unwrap_or_else(|| {
                    if start.is_all_day() {
                        Duration::days(1)
                    } else {
                        Duration::zero()
                    }
                });
            add_duration(&start, duration)
        }
    };

    // Expanded instances share the UID; RECURRENCE-ID tells them apart.
    let provider_event_id = match vevent.find_prop("RECURRENCE-ID") {
        Some(recurrence_id) => format!("{uid}#{}", value(recurrence_id)),
        None => uid.clone(),
    };

    let status = match vevent.find_prop("STATUS").map(value) {
        Some("CANCELLED") => EventStatus::Cancelled,
        Some("TENTATIVE") => EventStatus::Tentative,
        _ => EventStatus::Confirmed,
    };

    let visibility = vevent.find_prop("CLASS").and_then(|prop| match value(prop) {
        "PUBLIC" => Some(EventVisibility::Public),
        "PRIVATE" => Some(EventVisibility::Private),
        "CONFIDENTIAL" => Some(EventVisibility::Confidential),
        _ => None,
    });

    let attendees = vevent
        .properties
        .iter()
        .filter(|prop| prop.name == "ATTENDEE")
        .filter_map(|prop| parse_attendee(prop, &uid))
        .collect();

    Ok(ExternalEvent {
        provider_event_id,
        title: text_prop(vevent, "SUMMARY").unwrap_or_default(),
        description: text_prop(vevent, "DESCRIPTION"),
        start,
        end,
        location: text_prop(vevent, "LOCATION"),
        attendees,
        recurrence_rule: vevent.find_prop("RRULE").map(|prop| value(prop).to_string()),
        status,
        visibility,
    })
}

/// Every VEVENT in a calendar object. Floating times are read in
/// `default_tz` when given, otherwise as UTC. Unreadable VEVENTs are logged
/// and skipped.
pub fn parse_events(data: &str, default_tz: Option<&str>) -> Result<Vec<ExternalEvent>> {
    // XML parsing normalizes CRLF to LF inside calendar-data.
    let normalized = data.replace("\r\n", "\n").replace('\n', "\r\n");
    let unfolded = unfold(&normalized);
    let calendar = read_calendar(&unfolded)
        .map_err(|err| CalSyncError::ProviderApi(format!("invalid iCalendar data: {err}")))?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    let mut events = Vec::with_capacity(vevents.len());
    for vevent in vevents {
        match to_external(vevent, default_tz) {
            Ok(event) => events.push(event),
            Err(err) => warn!(error = %err, "skipping unreadable VEVENT"),
        }
    }
    Ok(events)
}

fn add_time(vevent: &mut icalendar::Event, name: &str, time: &EventTime) {
    match time {
        EventTime::AllDay { date } => {
            let mut prop = icalendar::Property::new(name, date.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            vevent.append_property(prop);
        }
        EventTime::Timed { at, .. } => {
            vevent.add_property(name, format_utc(*at));
        }
    }
}

/// Minimal VCALENDAR holding one VEVENT for a CalDAV PUT.
pub fn render_event(uid: &str, event: &NewEventData, stamp: DateTime<Utc>) -> String {
    let mut vevent = icalendar::Event::new();
    vevent.uid(uid);
    vevent.add_property("DTSTAMP", format_utc(stamp));
    add_time(&mut vevent, "DTSTART", &event.start);
    add_time(&mut vevent, "DTEND", &event.end);
    vevent.summary(&event.title);
    if let Some(description) = &event.description {
        vevent.description(description);
    }
    if let Some(location) = &event.location {
        vevent.location(location);
    }
    let status = match event.status {
        EventStatus::Confirmed => "CONFIRMED",
        EventStatus::Tentative => "TENTATIVE",
        EventStatus::Cancelled => "CANCELLED",
    };
    vevent.add_property("STATUS", status);
    match event.visibility {
        Some(EventVisibility::Private) => {
            vevent.add_property("CLASS", "PRIVATE");
        }
        Some(EventVisibility::Confidential) => {
            vevent.add_property("CLASS", "CONFIDENTIAL");
        }
        Some(EventVisibility::Public) => {
            vevent.add_property("CLASS", "PUBLIC");
        }
        Some(EventVisibility::Default) | None => {}
    }
    for attendee in &event.attendees {
        let mut prop = icalendar::Property::new("ATTENDEE", format!("mailto:{}", attendee.email));
        if let Some(name) = &attendee.name {
            prop.add_parameter("CN", name);
        }
        vevent.append_multi_property(prop);
    }

    let mut calendar = Calendar::new();
    calendar.push(vevent.done());
    calendar.done().to_string()
}
