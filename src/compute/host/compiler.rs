//! Проверка исходного кода ядер для эмулятора
//!
//! Это не настоящий компилятор OpenCL C: он разбирает исходник на лексемы,
//! проверяет парность скобок, находит объявления `__kernel` и сверяет их
//! с встроенными ядрами. Определение ядра должно совпадать с эталонным
//! исходником с точностью до пробелов и комментариев: эмулятор исполняет
//! только свою реализацию. Ошибки оформляются как лог компилятора:
//! позиция, сообщение, строка исходника и указатель на столбец.

use super::kernels::{self, Builtin, ParamKind};
use std::ops::Range;

/// Объявление ядра, найденное в исходнике
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelDecl {
    pub name: String,
    pub params: Vec<ParamKind>,
}

#[derive(Debug)]
struct Diagnostic {
    offset: usize,
    message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Literal(String),
    Punct(char),
}

/// Найденное объявление и диапазон его лексем
struct Found {
    offset: usize,
    decl: KernelDecl,
    /// От квалификатора до закрывающей `}` тела включительно
    span: Range<usize>,
}

/// Компилирует исходник; при ошибке возвращает лог сборки
pub(crate) fn compile(source: &str) -> Result<Vec<KernelDecl>, String> {
    let code = strip_comments(source).map_err(|d| render(source, &[d]))?;

    let mut diagnostics = Vec::new();
    let tokens = tokenize(&code, &mut diagnostics);
    check_brackets(&tokens, &mut diagnostics);
    if !diagnostics.is_empty() {
        return Err(render(source, &diagnostics));
    }

    let decls = find_kernels(&tokens, &mut diagnostics);
    if decls.is_empty() && diagnostics.is_empty() {
        diagnostics.push(Diagnostic {
            offset: 0,
            message: "no __kernel functions defined in program".into(),
        });
    }

    let mut seen: Vec<&str> = Vec::new();
    for found in &decls {
        let (offset, decl) = (found.offset, &found.decl);
        if seen.contains(&decl.name.as_str()) {
            diagnostics.push(Diagnostic {
                offset,
                message: format!("redefinition of kernel '{}'", decl.name),
            });
            continue;
        }
        seen.push(&decl.name);

        match kernels::lookup(&decl.name) {
            None => diagnostics.push(Diagnostic {
                offset,
                message: format!("kernel '{}' is not supported by the host device", decl.name),
            }),
            Some(builtin) if builtin.params != decl.params.as_slice() => {
                diagnostics.push(Diagnostic {
                    offset,
                    message: format!(
                        "kernel '{}' must be declared with {} parameters ({}), found {}",
                        decl.name,
                        builtin.params.len(),
                        builtin.signature(),
                        decl.params.len()
                    ),
                })
            }
            Some(builtin) if !matches_reference(&tokens[found.span.clone()], builtin) => {
                diagnostics.push(Diagnostic {
                    offset,
                    message: format!(
                        "kernel '{}' differs from the built-in definition; host device executes only built-in kernels",
                        decl.name
                    ),
                })
            }
            Some(_) => {}
        }
    }

    if !diagnostics.is_empty() {
        return Err(render(source, &diagnostics));
    }
    Ok(decls.into_iter().map(|found| found.decl).collect())
}

/// Определение совпадает с эталонным лексема в лексему
fn matches_reference(definition: &[(usize, Token)], builtin: &Builtin) -> bool {
    let Some(reference) = builtin.reference_source() else {
        return false;
    };
    let Ok(code) = strip_comments(reference) else {
        return false;
    };
    let mut scratch = Vec::new();
    let tokens = tokenize(&code, &mut scratch);
    let Some(found) = find_kernels(&tokens, &mut scratch)
        .into_iter()
        .find(|found| found.decl.name == builtin.name)
    else {
        return false;
    };
    let expected = &tokens[found.span];
    expected.len() == definition.len() && expected.iter().zip(definition).all(|((_, a), (_, b))| a == b)
}

/// Заменяет комментарии пробелами, сохраняя смещения и переводы строк
fn strip_comments(source: &str) -> Result<String, Diagnostic> {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                out[i] = b' ';
                i += 1;
            }
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let start = i;
            out[i] = b' ';
            out[i + 1] = b' ';
            i += 2;
            loop {
                if i >= bytes.len() {
                    return Err(Diagnostic {
                        offset: start,
                        message: "unterminated /* comment".into(),
                    });
                }
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    i += 2;
                    break;
                }
                if bytes[i] != b'\n' {
                    out[i] = b' ';
                }
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn tokenize(code: &str, diagnostics: &mut Vec<Diagnostic>) -> Vec<(usize, Token)> {
    let mut tokens = Vec::new();
    let mut chars = code.char_indices().peekable();
    let mut line_start = true;

    while let Some((offset, c)) = chars.next() {
        if c == '\n' {
            line_start = true;
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        // Директивы препроцессора пропускаются целиком
        if c == '#' && line_start {
            while let Some(&(_, next)) = chars.peek() {
                if next == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }
        line_start = false;

        if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::from(c);
            while let Some(&(_, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    ident.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((offset, Token::Ident(ident)));
        } else if c.is_ascii_digit() {
            let mut number = String::from(c);
            while let Some(&(_, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '.' || next == '_' {
                    number.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((offset, Token::Number(number)));
        } else if c == '"' || c == '\'' {
            let mut literal = String::from(c);
            let mut closed = false;
            while let Some((_, next)) = chars.next() {
                literal.push(next);
                if next == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        literal.push(escaped);
                    }
                } else if next == c {
                    closed = true;
                    break;
                } else if next == '\n' {
                    break;
                }
            }
            if !closed {
                diagnostics.push(Diagnostic {
                    offset,
                    message: format!("missing terminating {} character", c),
                });
            }
            tokens.push((offset, Token::Literal(literal)));
        } else if c.is_ascii_punctuation() {
            tokens.push((offset, Token::Punct(c)));
        } else {
            diagnostics.push(Diagnostic {
                offset,
                message: format!("invalid character '{}' in source", c),
            });
        }
    }
    tokens
}

fn check_brackets(tokens: &[(usize, Token)], diagnostics: &mut Vec<Diagnostic>) {
    let mut stack: Vec<(usize, char)> = Vec::new();
    for (offset, token) in tokens {
        let Token::Punct(c) = token else { continue };
        let c = *c;
        match c {
            '(' | '[' | '{' => stack.push((*offset, c)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((_, open)) if open == expected => {}
                    Some((open_offset, open)) => {
                        diagnostics.push(Diagnostic {
                            offset: *offset,
                            message: format!("expected '{}' before '{}'", closing(open), c),
                        });
                        diagnostics.push(Diagnostic {
                            offset: open_offset,
                            message: format!("to match this '{}'", open),
                        });
                        return;
                    }
                    None => {
                        diagnostics.push(Diagnostic {
                            offset: *offset,
                            message: format!("extraneous closing '{}'", c),
                        });
                        return;
                    }
                }
            }
            _ => {}
        }
    }
    if let Some((offset, open)) = stack.pop() {
        diagnostics.push(Diagnostic {
            offset,
            message: format!("expected '{}' at end of input to match this '{}'", closing(open), open),
        });
    }
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_ident(token: Option<&(usize, Token)>, word: &str) -> bool {
    matches!(token, Some((_, Token::Ident(ident))) if ident == word)
}

/// `__kernel` всегда квалификатор; `kernel` только в начале объявления
fn starts_declaration(tokens: &[(usize, Token)], i: usize) -> bool {
    match &tokens[i].1 {
        Token::Ident(word) if word == "__kernel" => true,
        Token::Ident(word) if word == "kernel" => {
            let at_top = i == 0 || matches!(tokens[i - 1].1, Token::Punct('}') | Token::Punct(';'));
            at_top && matches!(tokens.get(i + 1), Some((_, Token::Ident(_))))
        }
        _ => false,
    }
}

/// Индекс после `}`, парной к `{` в позиции `open`
fn body_end(tokens: &[(usize, Token)], open: usize) -> usize {
    let mut depth = 0usize;
    for (k, (_, token)) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::Punct('{') => depth += 1,
            Token::Punct('}') => {
                depth -= 1;
                if depth == 0 {
                    return k + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

fn find_kernels(tokens: &[(usize, Token)], diagnostics: &mut Vec<Diagnostic>) -> Vec<Found> {
    let mut decls = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !starts_declaration(tokens, i) {
            i += 1;
            continue;
        }
        let qualifier_offset = tokens[i].0;

        if !is_ident(tokens.get(i + 1), "void") {
            diagnostics.push(Diagnostic {
                offset: qualifier_offset,
                message: "kernel function must have void return type".into(),
            });
            i += 1;
            continue;
        }
        let (name_offset, name) = match tokens.get(i + 2) {
            Some((offset, Token::Ident(name))) => (*offset, name.clone()),
            other => {
                diagnostics.push(Diagnostic {
                    offset: other.map_or(qualifier_offset, |(o, _)| *o),
                    message: "expected kernel name".into(),
                });
                i += 2;
                continue;
            }
        };
        if tokens.get(i + 3).map(|(_, t)| t) != Some(&Token::Punct('(')) {
            diagnostics.push(Diagnostic {
                offset: name_offset,
                message: format!("expected '(' after kernel name '{}'", name),
            });
            i += 3;
            continue;
        }

        // Параметры до парной ')'
        let mut depth = 0usize;
        let mut j = i + 3;
        let mut params: Vec<Vec<&Token>> = vec![Vec::new()];
        while j < tokens.len() {
            match &tokens[j].1 {
                Token::Punct('(') => {
                    depth += 1;
                    if depth > 1 {
                        if let Some(current) = params.last_mut() {
                            current.push(&tokens[j].1);
                        }
                    }
                }
                Token::Punct(')') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    if let Some(current) = params.last_mut() {
                        current.push(&tokens[j].1);
                    }
                }
                Token::Punct(',') if depth == 1 => params.push(Vec::new()),
                other => {
                    if let Some(current) = params.last_mut() {
                        current.push(other);
                    }
                }
            }
            j += 1;
        }
        let close_offset = tokens.get(j).map_or(name_offset, |(o, _)| *o);

        let no_params = params.len() == 1
            && (params[0].is_empty() || params[0] == [&Token::Ident("void".into())]);
        let mut kinds = Vec::new();
        if !no_params {
            for param in &params {
                if param.is_empty() {
                    diagnostics.push(Diagnostic {
                        offset: close_offset,
                        message: format!("expected parameter declaration in kernel '{}'", name),
                    });
                    continue;
                }
                kinds.push(classify(param));
            }
        }

        let end = if tokens.get(j + 1).map(|(_, t)| t) == Some(&Token::Punct('{')) {
            body_end(tokens, j + 1)
        } else {
            diagnostics.push(Diagnostic {
                offset: close_offset,
                message: format!("expected function body after declaration of '{}'", name),
            });
            (j + 1).min(tokens.len())
        };

        decls.push(Found {
            offset: name_offset,
            decl: KernelDecl { name, params: kinds },
            span: i..end,
        });
        i = end.max(i + 1);
    }
    decls
}

fn classify(param: &[&Token]) -> ParamKind {
    let has = |word: &str| param.iter().any(|t| matches!(t, Token::Ident(w) if w == word));
    if has("__local") || has("local") {
        ParamKind::Local
    } else if param.iter().any(|t| **t == Token::Punct('*')) {
        ParamKind::Global
    } else {
        ParamKind::Scalar
    }
}

fn render(source: &str, diagnostics: &[Diagnostic]) -> String {
    let mut log = String::new();
    for diagnostic in diagnostics {
        let (line, column, text) = locate(source, diagnostic.offset);
        log.push_str(&format!(
            "<kernel>:{}:{}: error: {}\n{}\n{}^\n",
            line,
            column,
            diagnostic.message,
            text,
            " ".repeat(column.saturating_sub(1))
        ));
    }
    log.push_str(&format!("{} error(s) generated.\n", diagnostics.len()));
    log
}

/// Номер строки, столбец (оба с единицы) и текст строки для смещения
fn locate(source: &str, offset: usize) -> (usize, usize, &str) {
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |p| p + 1);
    let line_end = source[offset..].find('\n').map_or(source.len(), |p| offset + p);
    let line = source[..offset].matches('\n').count() + 1;
    let column = source[line_start..offset].chars().count() + 1;
    (line, column, &source[line_start..line_end])
}
