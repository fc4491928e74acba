use anyhow::Result;
use serde_json::Value;
use shopsync::jwt::TokenClaims;
use shopsync::{Resource, User};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Backend field names vary; first one present wins.
fn first_present<'a>(record: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .map(|k| &record[*k])
        .find(|v| !v.is_null())
}

fn plain(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One line per record: id, a label, and the stock level for anything that has one.
pub fn pp_records(resource: Resource, records: &[Value]) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    if records.is_empty() {
        stdout.set_color(ColorSpec::new().set_dimmed(true))?;
        writeln!(&mut stdout, "no {resource}")?;
        stdout.reset()?;
        return Ok(());
    }
    for record in records {
        let id = record.get("id").map(plain).unwrap_or_else(|| "-".to_string());
        stdout.set_color(ColorSpec::new().set_bold(true))?;
        write!(&mut stdout, "{:>6}", id)?;
        stdout.reset()?;

        let label = first_present(
            record,
            &["name", "nome", "productName", "customerName", "email"],
        )
        .map(plain)
        .unwrap_or_default();
        write!(&mut stdout, "  {label}")?;

        if let Some(qty) = first_present(record, &["stockQuantity", "quantity"]).and_then(Value::as_f64)
        {
            if qty <= 0.0 {
                stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
            } else {
                stdout.set_color(ColorSpec::new().set_dimmed(true))?;
            }
            write!(&mut stdout, "  qty={qty}")?;
            stdout.reset()?;
        }
        if let Some(total) = first_present(record, &["totalValue", "price", "total"]) {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
            write!(&mut stdout, "  {}", plain(total))?;
            stdout.reset()?;
        }
        writeln!(&mut stdout)?;
    }
    Ok(())
}

pub fn pp_user(user: &User) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    stdout.set_color(ColorSpec::new().set_bold(true))?;
    write!(&mut stdout, "{}", user.display_name())?;
    stdout.reset()?;
    stdout.set_color(ColorSpec::new().set_dimmed(true))?;
    write!(&mut stdout, " (id {})", user.id)?;
    if let Some(email) = &user.email {
        write!(&mut stdout, " <{email}>")?;
    }
    stdout.reset()?;
    writeln!(&mut stdout)?;
    Ok(())
}

/// Status lines for an access token's claims.
pub fn describe_claims(claims: &TokenClaims) -> Vec<String> {
    let mut lines = vec![];
    if let Some(sub) = &claims.subject {
        lines.push(format!("token subject: {sub}"));
    }
    lines.push(match claims.seconds_remaining() {
        Some(secs) if secs > 0 => format!("token expires in: {secs}s"),
        // the backend accepted it anyway, so its clock disagrees
        Some(_) => "token expired by local clock".to_string(),
        None => "token expiry: unknown".to_string(),
    });
    lines
}

#[test]
fn test_describe_claims() {
    let claims = TokenClaims {
        subject: Some("42".to_string()),
        email: None,
        expires_at: Some(1700000000),
    };
    assert_eq!(
        describe_claims(&claims),
        vec!["token subject: 42", "token expired by local clock"]
    );
    // the claims stay usable after being described
    assert_eq!(claims.subject.as_deref(), Some("42"));

    let claims = TokenClaims {
        subject: None,
        email: None,
        expires_at: None,
    };
    assert_eq!(describe_claims(&claims), vec!["token expiry: unknown"]);
}

#[test]
fn test_first_present() {
    use serde_json::json;
    let rec = json!({"id": 3, "nome": "Arroz", "quantity": "7"});
    assert_eq!(first_present(&rec, &["name", "nome"]), Some(&json!("Arroz")));
    assert_eq!(first_present(&rec, &["price"]), None);
    assert_eq!(plain(&json!("Arroz")), "Arroz");
    assert_eq!(plain(&json!(12.5)), "12.5");
}
