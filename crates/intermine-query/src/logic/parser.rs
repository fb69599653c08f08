use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, satisfy},
    combinator::{map, not, value},
    multi::many0,
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use super::Logic;

#[derive(Clone, Copy)]
enum LogicOperator {
    And,
    Or,
}

/// Eats {0-n} whitespace characters.
fn whitespace(i: &str) -> IResult<&str, &str> {
    let chars = " \t\r\n";
    take_while(move |c| chars.contains(c))(i)
}

fn word_end(i: &str) -> IResult<&str, ()> {
    not(satisfy(|c: char| c.is_alphanumeric() || c == '_'))(i)
}

fn code(i: &str) -> IResult<&str, Logic> {
    map(
        terminated(satisfy(|c: char| c.is_ascii_alphabetic()), word_end),
        |c| Logic::Code(c.to_ascii_uppercase()),
    )(i)
}

fn subexpr(i: &str) -> IResult<&str, Logic> {
    delimited(
        pair(char('('), whitespace),
        or_expr,
        pair(whitespace, char(')')),
    )(i)
}

fn term(i: &str) -> IResult<&str, Logic> {
    alt((code, subexpr))(i)
}

fn and_operator(i: &str) -> IResult<&str, LogicOperator> {
    value(
        LogicOperator::And,
        delimited(
            whitespace,
            alt((tag("&&"), tag("&"), terminated(tag_no_case("and"), word_end))),
            whitespace,
        ),
    )(i)
}

fn or_operator(i: &str) -> IResult<&str, LogicOperator> {
    value(
        LogicOperator::Or,
        delimited(
            whitespace,
            alt((tag("||"), tag("|"), terminated(tag_no_case("or"), word_end))),
            whitespace,
        ),
    )(i)
}

fn fold(root: Logic, trail: Vec<(LogicOperator, Logic)>) -> Logic {
    trail.into_iter().fold(root, |acc, (op, rhs)| match op {
        LogicOperator::And => Logic::And(Box::new(acc), Box::new(rhs)),
        LogicOperator::Or => Logic::Or(Box::new(acc), Box::new(rhs)),
    })
}

fn and_expr(i: &str) -> IResult<&str, Logic> {
    map(tuple((term, many0(tuple((and_operator, term))))), |(root, trail)| {
        fold(root, trail)
    })(i)
}

fn or_expr(i: &str) -> IResult<&str, Logic> {
    map(
        tuple((and_expr, many0(tuple((or_operator, and_expr))))),
        |(root, trail)| fold(root, trail),
    )(i)
}

/// Parses a full logic expression, returning the unparsed remainder.
pub(super) fn expression(i: &str) -> IResult<&str, Logic> {
    delimited(whitespace, or_expr, whitespace)(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_of(c: char) -> Box<Logic> {
        Box::new(Logic::Code(c))
    }

    #[test]
    fn single_code() {
        let (rest, l) = expression("  a ").unwrap();
        assert_eq!(rest, "");
        assert_eq!(l, Logic::Code('A'));
    }

    #[test]
    fn and_binds_tighter() {
        let (rest, l) = expression("A or B and C").unwrap();
        assert_eq!(rest, "");
        assert_eq!(
            l,
            Logic::Or(code_of('A'), Box::new(Logic::And(code_of('B'), code_of('C'))))
        );
    }

    #[test]
    fn symbolic_operators() {
        let (_, l) = expression("A&&B||C").unwrap();
        assert_eq!(
            l,
            Logic::Or(Box::new(Logic::And(code_of('A'), code_of('B'))), code_of('C'))
        );

        let (_, l) = expression("A & B | C").unwrap();
        assert_eq!(
            l,
            Logic::Or(Box::new(Logic::And(code_of('A'), code_of('B'))), code_of('C'))
        );
    }

    #[test]
    fn parentheses() {
        let (rest, l) = expression("A AND ( b OR c )").unwrap();
        assert_eq!(rest, "");
        assert_eq!(
            l,
            Logic::And(code_of('A'), Box::new(Logic::Or(code_of('B'), code_of('C'))))
        );
    }

    #[test]
    fn chains_fold_left() {
        let (_, l) = expression("A and B and C").unwrap();
        assert_eq!(
            l,
            Logic::And(Box::new(Logic::And(code_of('A'), code_of('B'))), code_of('C'))
        );
    }

    #[test]
    fn leaves_unparsed_input() {
        let (rest, _) = expression("A and B C").unwrap();
        assert_eq!(rest, "C");

        let (rest, _) = expression("A andB").unwrap();
        assert_eq!(rest, "andB");

        assert!(expression("AB").is_err());
        assert!(expression("(A or B").is_err());
    }
}
