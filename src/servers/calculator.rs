//! Calculator server: `calculate`, `add`, `multiply`.

use serde_json::{json, Value};

use super::{format_float, number_arg, ToolHandler};

pub struct Calculator;

impl ToolHandler for Calculator {
    fn server_name(&self) -> &'static str {
        "calculator"
    }

    fn tools(&self) -> Value {
        let pair = json!({
            "type": "object",
            "properties": {
                "a": {"type": "number", "description": "First number"},
                "b": {"type": "number", "description": "Second number"}
            },
            "required": ["a", "b"]
        });
        json!([
            {
                "name": "calculate",
                "description": "Perform mathematical calculations",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "expression": {
                            "type": "string",
                            "description": "Mathematical expression to evaluate"
                        }
                    },
                    "required": ["expression"]
                }
            },
            { "name": "add", "description": "Add two numbers", "inputSchema": pair },
            { "name": "multiply", "description": "Multiply two numbers", "inputSchema": pair }
        ])
    }

    fn call(&self, tool: &str, arguments: &Value) -> Result<String, String> {
        let value = match tool {
            "calculate" => {
                let expression = arguments
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                evaluate(expression).map_err(|e| format!("Invalid expression: {e}"))?
            }
            "add" => number_arg(arguments, "a")? + number_arg(arguments, "b")?,
            "multiply" => number_arg(arguments, "a")? * number_arg(arguments, "b")?,
            other => return Err(format!("Unknown tool: {other}")),
        };
        Ok(format_float(value))
    }
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

/// Evaluate an arithmetic expression.
///
/// Supports `+ - * / // % **` (`^` is an alias for `**`), parentheses, unary
/// signs, the constants `pi`, `e`, `tau`, `inf`, and a fixed set of math
/// functions. Power is right-associative and binds tighter than unary minus.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    match parser.peek() {
        None => Ok(value),
        Some(token) => Err(format!("unexpected token {token}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Percent,
    Power,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "'{}'", format_float(*n)),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::FloorDiv => f.write_str("'//'"),
            Token::Percent => f.write_str("'%'"),
            Token::Power => f.write_str("'**'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent: 1e5, 2.5E-3
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::FloorDiv);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' | '×' => Token::Star,
                    '/' | '÷' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Power,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(format!("unexpected character '{other}'")),
                };
                tokens.push(token);
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Nesting limit for parentheses, calls and unary signs.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                value += self.term()?;
            } else if self.eat(&Token::Minus) {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    // term := unary (('*' | '/' | '//' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                value *= self.unary()?;
            } else if self.eat(&Token::Slash) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("division by zero".into());
                }
                value /= rhs;
            } else if self.eat(&Token::FloorDiv) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("integer division or modulo by zero".into());
                }
                value = (value / rhs).floor();
            } else if self.eat(&Token::Percent) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("modulo by zero".into());
                }
                // result takes the sign of the divisor
                value -= rhs * (value / rhs).floor();
            } else {
                return Ok(value);
            }
        }
    }

    // Every recursive rule passes through here, so this bounds the stack.
    fn unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression too deeply nested".into());
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    // unary := ('+' | '-') unary | power
    fn signed(&mut self) -> Result<f64, String> {
        if self.eat(&Token::Minus) {
            return Ok(-self.unary()?);
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    // power := primary (('**' | '^') unary)?
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.eat(&Token::Power) {
            let exponent = self.unary()?;
            if base == 0.0 && exponent < 0.0 {
                return Err("0.0 cannot be raised to a negative power".into());
            }
            let value = base.powf(exponent);
            if value.is_nan() && !base.is_nan() && !exponent.is_nan() {
                return Err("math domain error".into());
            }
            return Ok(value);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing ')'".into());
                }
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    apply_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(token) => Err(format!("unexpected token {token}")),
            None => Err("unexpected end of expression".into()),
        }
    }

    /// Comma-separated arguments after an opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            return Err("expected ',' or ')' in argument list".into());
        }
    }
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        "inf" => Ok(f64::INFINITY),
        other => Err(format!("name '{other}' is not defined")),
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, String> {
    let one = |f: fn(f64) -> f64| -> Result<f64, String> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(format!("{name}() takes exactly one argument ({} given)", args.len())),
        }
    };
    let domain = |ok: bool, value: Result<f64, String>| -> Result<f64, String> {
        if ok {
            value
        } else {
            Err("math domain error".into())
        }
    };
    let first = args.first().copied().unwrap_or(0.0);

    match name {
        "sqrt" => domain(first >= 0.0, one(f64::sqrt)),
        "sin" => one(f64::sin),
        "cos" => one(f64::cos),
        "tan" => one(f64::tan),
        "asin" => domain((-1.0..=1.0).contains(&first), one(f64::asin)),
        "acos" => domain((-1.0..=1.0).contains(&first), one(f64::acos)),
        "atan" => one(f64::atan),
        "exp" => one(f64::exp),
        "abs" | "fabs" => one(f64::abs),
        "floor" => one(f64::floor),
        "ceil" => one(f64::ceil),
        "degrees" => one(f64::to_degrees),
        "radians" => one(f64::to_radians),
        "log10" => domain(first > 0.0, one(f64::log10)),
        "log2" => domain(first > 0.0, one(f64::log2)),
        "log" => match args {
            [x] => domain(*x > 0.0, Ok(x.ln())),
            [x, base] => domain(*x > 0.0 && *base > 0.0 && *base != 1.0, Ok(x.log(*base))),
            _ => Err(format!("log() takes 1 or 2 arguments ({} given)", args.len())),
        },
        "round" => match args {
            [x] => Ok(x.round_ties_even()),
            [x, digits] => {
                let factor = 10f64.powi(*digits as i32);
                Ok((x * factor).round_ties_even() / factor)
            }
            _ => Err(format!("round() takes 1 or 2 arguments ({} given)", args.len())),
        },
        "pow" => match args {
            [x, y] => {
                let value = x.powf(*y);
                domain(!value.is_nan(), Ok(value))
            }
            _ => Err(format!("pow() takes exactly 2 arguments ({} given)", args.len())),
        },
        "hypot" => Ok(args.iter().map(|x| x * x).sum::<f64>().sqrt()),
        "min" | "max" => {
            if args.is_empty() {
                return Err(format!("{name}() expected at least 1 argument, got 0"));
            }
            let pick = if name == "min" { f64::min } else { f64::max };
            Ok(args.iter().copied().fold(args[0], pick))
        }
        other => Err(format!("name '{other}' is not defined")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> f64 {
        evaluate(expr).unwrap_or_else(|e| panic!("{expr}: {e}"))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 2 * 3"), 8.0);
        assert_eq!(eval("(2 + 2) * 3"), 12.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("2 ** 3 ** 2"), 512.0);
        assert_eq!(eval("2 ^ 10"), 1024.0);
        assert_eq!(eval("-2 ** 2"), -4.0);
        assert_eq!(eval("2 * -3"), -6.0);
        assert_eq!(eval("+5"), 5.0);
    }

    #[test]
    fn test_division_and_modulo() {
        assert_eq!(eval("7 / 2"), 3.5);
        assert_eq!(eval("7 // 2"), 3.0);
        assert_eq!(eval("-7 // 2"), -4.0);
        assert_eq!(eval("7 % 3"), 1.0);
        assert_eq!(eval("-7 % 3"), 2.0);
        assert!(evaluate("1 / 0").unwrap_err().contains("division by zero"));
        assert!(evaluate("1 % 0").is_err());
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(eval("sqrt(16)"), 4.0);
        assert_eq!(eval("abs(-3)"), 3.0);
        assert_eq!(eval("max(1, 5, 3)"), 5.0);
        assert_eq!(eval("min(4, 2)"), 2.0);
        assert_eq!(eval("pow(2, 8)"), 256.0);
        assert_eq!(eval("hypot(3, 4)"), 5.0);
        assert_eq!(eval("floor(2.7) + ceil(2.1)"), 5.0);
        assert_eq!(eval("round(2.5)"), 2.0);
        assert_eq!(eval("round(3.14159, 2)"), 3.14);
        assert_eq!(eval("log(e)"), 1.0);
        assert_eq!(eval("log(8, 2)"), 3.0);
        assert_eq!(eval("log10(1000)"), 3.0);
        assert!((eval("sin(pi / 2)") - 1.0).abs() < 1e-12);
        assert!((eval("tau") - 2.0 * std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(eval("1.5e3"), 1500.0);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate("").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("sqrt(-1)").unwrap_err().contains("domain"));
        assert!(evaluate("log(0)").is_err());
        assert!(evaluate("__import__('os')").is_err());
        assert!(evaluate("foo(1)").unwrap_err().contains("not defined"));
        assert!(evaluate("x + 1").is_err());
        assert!(evaluate("2 $ 3").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(evaluate(&parens), Err("expression too deeply nested".to_string()));

        let unclosed = "(".repeat(200_000);
        assert_eq!(evaluate(&unclosed), Err("expression too deeply nested".to_string()));

        let signs = format!("{}1", "-".repeat(100_000));
        assert_eq!(evaluate(&signs), Err("expression too deeply nested".to_string()));

        let calls = format!("{}1{}", "abs(".repeat(10_000), ")".repeat(10_000));
        assert!(evaluate(&calls).unwrap_err().contains("too deeply nested"));

        let err = Calculator
            .call("calculate", &json!({"expression": "(".repeat(50_000)}))
            .unwrap_err();
        assert!(err.contains("too deeply nested"), "{err}");
    }

    #[test]
    fn test_moderate_nesting_still_evaluates() {
        let parens = format!("{}2{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&parens), Ok(2.0));
        assert_eq!(evaluate(&format!("{}3", "-".repeat(100))), Ok(3.0));
        assert_eq!(evaluate("-(-(-(2 ** -1)))"), Ok(-0.5));
    }

    #[test]
    fn test_tool_calls() {
        let calc = Calculator;
        assert_eq!(
            calc.call("calculate", &json!({"expression": "2 + 2 * 3"})),
            Ok("8.0".to_string())
        );
        assert_eq!(calc.call("add", &json!({"a": 2, "b": 3})), Ok("5.0".to_string()));
        assert_eq!(
            calc.call("multiply", &json!({"a": 2.5, "b": 4})),
            Ok("10.0".to_string())
        );
        assert_eq!(calc.call("add", &json!({"a": 0.1, "b": 0.2})), Ok("0.30000000000000004".to_string()));

        let err = calc.call("calculate", &json!({"expression": "1/0"})).unwrap_err();
        assert!(err.starts_with("Invalid expression:"), "{err}");
        assert_eq!(calc.call("divide", &json!({})), Err("Unknown tool: divide".to_string()));
    }

    #[test]
    fn test_tool_definitions() {
        let tools = Calculator.tools();
        let names: Vec<_> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["calculate", "add", "multiply"]);
        assert_eq!(tools[1]["inputSchema"]["required"], json!(["a", "b"]));
    }
}
