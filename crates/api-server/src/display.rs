//! Display formatting for flow values. All values are whole millions USD.

/// `+$250M`, `-$180M`, `$0M`
pub fn format_millions(value: f64) -> String {
    let magnitude = value.abs().round();
    if magnitude == 0.0 {
        "$0M".to_string()
    } else if value > 0.0 {
        format!("+${:.0}M", magnitude)
    } else {
        format!("-${:.0}M", magnitude)
    }
}

/// Short direction tag shown under a cell value
pub fn direction_tag(value: f64) -> &'static str {
    if value > 0.0 {
        "In"
    } else if value < 0.0 {
        "Out"
    } else {
        "Flat"
    }
}
