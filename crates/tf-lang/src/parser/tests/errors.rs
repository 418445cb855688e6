use crate::parse_expr;
use crate::parser::SyntaxErrorKind;

fn err_of(text: &str) -> (SyntaxErrorKind, usize) {
    let e = parse_expr(text).unwrap_err();
    (e.kind, e.offset)
}

// -----------------------------------------------------------------------
// Error cases
// -----------------------------------------------------------------------

#[test]
fn reject_empty() {
    assert_eq!(err_of(""), (SyntaxErrorKind::Empty, 0));
    assert_eq!(err_of("   "), (SyntaxErrorKind::Empty, 0));
}

#[test]
fn reject_unclosed_paren() {
    assert_eq!(err_of("(1 + 2"), (SyntaxErrorKind::UnbalancedParen, 6));
    assert_eq!(err_of("avg(\"t\", \"1h\""), (SyntaxErrorKind::UnbalancedParen, 13));
}

#[test]
fn reject_stray_close_paren() {
    assert_eq!(err_of("1 + 2)"), (SyntaxErrorKind::UnbalancedParen, 5));
}

#[test]
fn reject_unterminated_string_at_opening_quote() {
    assert_eq!(
        err_of(r#"avg("temperature, "1h")"#).0,
        SyntaxErrorKind::UnexpectedToken
    );
    assert_eq!(
        err_of(r#"sum("power"#),
        (SyntaxErrorKind::UnterminatedString, 4)
    );
}

#[test]
fn reject_illegal_character() {
    assert_eq!(err_of("a + $b"), (SyntaxErrorKind::IllegalCharacter, 4));
    assert_eq!(err_of("a % b"), (SyntaxErrorKind::IllegalCharacter, 2));
}

#[test]
fn reject_unexpected_token() {
    assert_eq!(err_of("2 + * 3"), (SyntaxErrorKind::UnexpectedToken, 4));
    assert_eq!(err_of("2 3"), (SyntaxErrorKind::UnexpectedToken, 2));
    assert_eq!(err_of("(1 + )"), (SyntaxErrorKind::UnexpectedToken, 5));
}

#[test]
fn reject_dangling_operator() {
    assert_eq!(err_of("2 +"), (SyntaxErrorKind::UnexpectedEnd, 3));
    assert_eq!(err_of("2 ^"), (SyntaxErrorKind::UnexpectedEnd, 3));
    assert_eq!(err_of("1."), (SyntaxErrorKind::UnexpectedEnd, 2));
}

#[test]
fn error_message_mentions_offset() {
    let e = parse_expr("a + #").unwrap_err();
    let msg = e.to_string();
    assert!(msg.contains("offset 4"), "got: {msg}");
    assert!(msg.contains("illegal character"), "got: {msg}");
}

#[test]
fn reject_overflowing_literal_at_its_start() {
    assert_eq!(err_of("1e999"), (SyntaxErrorKind::UnexpectedToken, 0));
    let e = parse_expr("2 * 1e999 + 1").unwrap_err();
    assert_eq!((e.kind, e.offset), (SyntaxErrorKind::UnexpectedToken, 4));
    assert!(e.message.contains("finite number"), "got: {}", e.message);
}
