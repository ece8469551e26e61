//! Plain-text rendering of roster listings.

use muster_store::Member;

/// Shown in place of an empty listing.
pub const EMPTY_ROSTER: &str = "(no members)";

/// Group digits in threes: `1234567` → `1,234,567`.
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    let lead = match digits.len() % 3 {
        0 => 3,
        r => r,
    };
    out.push_str(&digits[..lead.min(digits.len())]);
    let mut i = lead;
    while i < digits.len() {
        out.push(',');
        out.push_str(&digits[i..i + 3]);
        i += 3;
    }
    out
}

/// One line per member: `name - availability`.
pub fn availability_lines(members: &[Member]) -> Vec<String> {
    members
        .iter()
        .map(|m| format!("{} - {}", m.display_name, m.availability))
        .collect()
}

/// One line per member: `name - Orders: n, Lumber: n`.
pub fn resource_lines(members: &[Member]) -> Vec<String> {
    members
        .iter()
        .map(|m| {
            format!(
                "{} - Orders: {}, Lumber: {}",
                m.display_name,
                m.war_orders,
                format_number(m.lumber)
            )
        })
        .collect()
}

/// Join lines for display, or the empty-roster marker.
pub fn render_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        EMPTY_ROSTER.to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, orders: i64, lumber: i64, availability: &str) -> Member {
        Member {
            member_id: name.to_lowercase(),
            display_name: name.to_string(),
            war_orders: orders,
            lumber,
            availability: availability.to_string(),
            role_id: String::new(),
        }
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(25_000), "25,000");
        assert_eq!(format_number(123_456), "123,456");
        assert_eq!(format_number(1_234_567), "1,234,567");
        assert_eq!(format_number(-4_500), "-4,500");
        assert_eq!(format_number(i64::MIN), "-9,223,372,036,854,775,808");
    }

    #[test]
    fn listing_lines() {
        let members = vec![
            member("Aria", 3, 12_500, "18:00-20:00 GMT"),
            member("Brom", 0, 40, "Not Set"),
        ];
        assert_eq!(
            availability_lines(&members),
            vec!["Aria - 18:00-20:00 GMT", "Brom - Not Set"]
        );
        assert_eq!(
            resource_lines(&members),
            vec![
                "Aria - Orders: 3, Lumber: 12,500",
                "Brom - Orders: 0, Lumber: 40"
            ]
        );
    }

    #[test]
    fn render_empty_and_full() {
        assert_eq!(render_lines(&[]), EMPTY_ROSTER);
        assert_eq!(render_lines(&["a".to_string(), "b".to_string()]), "a\nb");
    }
}
