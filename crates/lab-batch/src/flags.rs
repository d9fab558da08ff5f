use serde_json::Value;

/// Flag name to value mapping for one trial.
pub type Flags = serde_json::Map<String, Value>;

/// Canonical text for a flag value.
pub fn format_flag_val(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format_float(f),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "[{}]",
            items
                .iter()
                .map(format_flag_val)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Object(_) => value.to_string(),
    }
}

/// Shortest round-trip digits, fixed notation for decimal exponents in
/// `-4..16` (always with a fractional part), otherwise `d.ddde[+-]XX`.
fn format_float(f: f64) -> String {
    if !f.is_finite() {
        return f.to_string();
    }
    let sci = format!("{:e}", f.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let sign = if f.is_sign_negative() { "-" } else { "" };
    if digits.trim_start_matches('0').is_empty() {
        return format!("{}0.0", sign);
    }
    let body = if !(-4..16).contains(&exp) {
        let (first, rest) = digits.split_at(1);
        let frac = if rest.is_empty() {
            String::new()
        } else {
            format!(".{}", rest)
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{}{}e{}{:02}", first, frac, exp_sign, exp.abs())
    } else if exp < 0 {
        format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
    } else {
        let int_len = exp as usize + 1;
        if digits.len() > int_len {
            format!("{}.{}", &digits[..int_len], &digits[int_len..])
        } else {
            format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
        }
    };
    format!("{}{}", sign, body)
}

pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// `name=value` pairs in name order, values shell quoted.
pub fn flag_assigns(flags: &Flags) -> Vec<String> {
    let mut names: Vec<&String> = flags.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| format!("{}={}", name, shell_quote(&format_flag_val(&flags[name]))))
        .collect()
}

pub fn flags_label(flags: &Flags) -> String {
    flag_assigns(flags).join(" ")
}
