use std::ops::Range;

use crate::instruction::{Branch, Instruction, LoopKind};
use crate::parser::error::ParseError;
use crate::parser::expression::{parse_expression, parse_macro_declaration};

/// Directive keywords that close a block and are only valid where a matching
/// opener is waiting for them.
const BLOCK_CLOSERS: &[&str] = &[
    "end",
    "endmacro",
    "elseif",
    "else",
    "endif",
    "endwhile",
    "endrepeat",
];

pub(crate) fn parse_source(source: &str, file: &str) -> Result<Vec<Instruction>, ParseError> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for (idx, text) in source.split_inclusive('\n').enumerate() {
        lines.push(Line {
            number: idx + 1,
            offset,
            text,
        });
        offset += text.len();
    }

    let mut scanner = Scanner {
        file,
        lines,
        pos: 0,
    };
    let (instructions, _) = scanner.parse_until(&[])?;
    Ok(instructions)
}

struct Line<'a> {
    number: usize,
    offset: usize,
    text: &'a str,
}

impl Line<'_> {
    fn span(&self) -> Range<usize> {
        let len = self.text.trim_end_matches(['\n', '\r']).len();
        self.offset..self.offset + len
    }
}

/// A consumed block terminator, with its operand for `@elseif`.
struct Terminator {
    keyword: String,
    operand: String,
    line: usize,
    span: Range<usize>,
}

/// Split a line into a directive keyword and its raw operand, if the first
/// non-whitespace token is `@<keyword>`.
fn directive_of<'a>(text: &'a str) -> Option<(&'a str, &'a str)> {
    let trimmed = text.trim_start();
    let rest = trimmed.strip_prefix('@')?;
    let first = rest.chars().next()?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return None;
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    Some((&rest[..end], rest[end..].trim_end_matches(['\n', '\r'])))
}

/// Strip `//` and `/* */` comments from a directive operand, leaving string
/// literals untouched. An unterminated block comment runs to the end of the
/// line.
fn strip_comments(operand: &str) -> String {
    let chars: Vec<char> = operand.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let quote = c;
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    out.push(ch);
                    i += 1;
                    if ch == '\\' && i < chars.len() {
                        out.push(chars[i]);
                        i += 1;
                    } else if ch == quote {
                        break;
                    }
                }
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '/' => break,
            '/' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Find the byte index of the `}` closing an inline slot, honoring nested
/// braces and quoted strings. `s` starts just past the `@{`.
fn find_close_brace(s: &str) -> Option<usize> {
    let mut depth = 1u32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

struct Scanner<'a> {
    file: &'a str,
    lines: Vec<Line<'a>>,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn error(&self, msg: impl Into<String>, line: usize, span: Range<usize>) -> ParseError {
        ParseError::new(msg, self.file, line, span)
    }

    /// Scan instructions until one of the `until` keywords is consumed.
    /// Returns `None` as the terminator at end of input.
    fn parse_until(
        &mut self,
        until: &[&str],
    ) -> Result<(Vec<Instruction>, Option<Terminator>), ParseError> {
        let mut list = Vec::new();

        while self.pos < self.lines.len() {
            let line = &self.lines[self.pos];
            let number = line.number;
            let span = line.span();

            let Some((keyword, raw_operand)) = directive_of(line.text) else {
                let text = line.text;
                self.pos += 1;
                self.parse_output_line(text, number, span, &mut list)?;
                continue;
            };

            let keyword = keyword.to_string();
            let operand = strip_comments(raw_operand).trim().to_string();
            self.pos += 1;

            if until.contains(&keyword.as_str()) {
                return Ok((
                    list,
                    Some(Terminator {
                        keyword,
                        operand,
                        line: number,
                        span,
                    }),
                ));
            }
            if BLOCK_CLOSERS.contains(&keyword.as_str()) {
                return Err(self.error(format!("Unexpected @{}", keyword), number, span));
            }

            match keyword.as_str() {
                "set" => list.push(self.parse_set(&operand, number, span)?),
                "include" => list.push(self.parse_include(&operand, number, span)?),
                "if" => list.push(self.parse_if(&operand, number, span)?),
                "while" => list.push(self.parse_loop(LoopKind::While, &operand, number, span)?),
                "repeat" => list.push(self.parse_loop(LoopKind::Repeat, &operand, number, span)?),
                "macro" => list.push(self.parse_macro(&operand, number, span)?),
                "error" => {
                    let value = parse_expression(&operand, self.file, number, span)?;
                    list.push(Instruction::Error {
                        value,
                        line: number,
                    });
                }
                "warning" => {
                    let value = parse_expression(&operand, self.file, number, span)?;
                    list.push(Instruction::Warning {
                        value,
                        line: number,
                    });
                }
                _ => {
                    return Err(self.error(format!("Unknown directive @{}", keyword), number, span));
                }
            }
        }

        Ok((list, None))
    }

    fn parse_set(
        &self,
        operand: &str,
        line: usize,
        span: Range<usize>,
    ) -> Result<Instruction, ParseError> {
        let end = operand
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(operand.len());
        let variable = &operand[..end];
        if variable.is_empty() || variable.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(self.error("Invalid @set: expected a variable name", line, span));
        }
        let rest = operand[end..].trim_start();
        let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();
        let value = parse_expression(rest, self.file, line, span)?;
        Ok(Instruction::Set {
            variable: variable.to_string(),
            value,
            line,
        })
    }

    fn parse_include(
        &self,
        operand: &str,
        line: usize,
        span: Range<usize>,
    ) -> Result<Instruction, ParseError> {
        let (once, rest) = match operand.strip_prefix("once") {
            Some(r) if r.chars().next().map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_') => {
                (true, r.trim_start())
            }
            _ => (false, operand),
        };
        let value = parse_expression(rest, self.file, line, span)?;
        Ok(Instruction::Include { value, once, line })
    }

    fn parse_if(
        &mut self,
        operand: &str,
        line: usize,
        span: Range<usize>,
    ) -> Result<Instruction, ParseError> {
        let test = parse_expression(operand, self.file, line, span.clone())?;
        let (consequent, term) = self.parse_until(&["elseif", "else", "endif"])?;
        let mut term =
            term.ok_or_else(|| self.error("Missing @endif", line, span.clone()))?;

        let mut elseifs = Vec::new();
        let mut alternate = None;
        loop {
            match term.keyword.as_str() {
                "elseif" => {
                    let branch_test =
                        parse_expression(&term.operand, self.file, term.line, term.span.clone())?;
                    let (body, next) = self.parse_until(&["elseif", "else", "endif"])?;
                    elseifs.push(Branch {
                        test: branch_test,
                        body,
                        line: term.line,
                    });
                    term = next.ok_or_else(|| {
                        self.error("Missing @endif", term.line, term.span.clone())
                    })?;
                }
                "else" => {
                    self.expect_bare(&term)?;
                    let (body, next) = self.parse_until(&["endif"])?;
                    alternate = Some(body);
                    term = next.ok_or_else(|| {
                        self.error("Missing @endif", term.line, term.span.clone())
                    })?;
                    self.expect_bare(&term)?;
                    break;
                }
                _ => {
                    self.expect_bare(&term)?;
                    break;
                }
            }
        }

        Ok(Instruction::Conditional {
            test,
            consequent,
            elseifs,
            alternate,
            line,
        })
    }

    fn parse_loop(
        &mut self,
        kind: LoopKind,
        operand: &str,
        line: usize,
        span: Range<usize>,
    ) -> Result<Instruction, ParseError> {
        let condition = parse_expression(operand, self.file, line, span.clone())?;
        let closer = match kind {
            LoopKind::While => "endwhile",
            LoopKind::Repeat => "endrepeat",
        };
        let (body, term) = self.parse_until(&[closer])?;
        let term =
            term.ok_or_else(|| self.error(format!("Missing @{}", closer), line, span))?;
        self.expect_bare(&term)?;
        Ok(Instruction::Loop {
            kind,
            condition,
            body,
            line,
        })
    }

    fn parse_macro(
        &mut self,
        operand: &str,
        line: usize,
        span: Range<usize>,
    ) -> Result<Instruction, ParseError> {
        let (name, parameters) = parse_macro_declaration(operand, self.file, line, span.clone())?;
        let (body, term) = self.parse_until(&["end", "endmacro"])?;
        let term = term.ok_or_else(|| self.error("Missing @end", line, span))?;
        self.expect_bare(&term)?;
        Ok(Instruction::Macro {
            name,
            parameters,
            body,
            line,
        })
    }

    /// Block terminators take no operand.
    fn expect_bare(&self, term: &Terminator) -> Result<(), ParseError> {
        if term.operand.is_empty() {
            Ok(())
        } else {
            Err(self.error(
                format!("Unexpected tokens after @{}", term.keyword),
                term.line,
                term.span.clone(),
            ))
        }
    }

    /// Split a verbatim line into Text fragments and Inline expression slots.
    fn parse_output_line(
        &self,
        text: &str,
        line: usize,
        span: Range<usize>,
        list: &mut Vec<Instruction>,
    ) -> Result<(), ParseError> {
        let mut rest = text;
        loop {
            let Some(pos) = rest.find("@{") else {
                if !rest.is_empty() {
                    list.push(Instruction::Text {
                        content: rest.to_string(),
                        line,
                    });
                }
                return Ok(());
            };
            if pos > 0 {
                list.push(Instruction::Text {
                    content: rest[..pos].to_string(),
                    line,
                });
            }
            let inner_start = pos + 2;
            let close = find_close_brace(&rest[inner_start..]).ok_or_else(|| {
                self.error("Unterminated inline expression", line, span.clone())
            })?;
            let inner = &rest[inner_start..inner_start + close];
            let value = parse_expression(inner, self.file, line, span.clone())?;
            list.push(Instruction::Inline { value, line });
            rest = &rest[inner_start + close + 1..];
        }
    }
}
