//! AST → LaTeX
//!
//! The inverse pass over everything the parser records: bracket styles come
//! from `lbrk`/`rbrk`, and the shape flags pick the spelling — mixed numbers
//! render as `3\frac{1}{2}`, repeating decimals as `0.\overline{3}`,
//! scientific products as `a\times 10^{k}`, slash fractions as `a/b`.
//! Implicit products are joined with spaces, explicit ones with `\cdot`.

use crate::ast::{Delim, Node, Op};

/// Render a tree to LaTeX
pub fn to_latex(node: &Node) -> String {
    let mut out = String::new();
    emit(node, &mut out);
    out
}

fn infix_op(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Eql => "=",
        Op::Ne => "\\ne",
        Op::Approx => "\\approx",
        Op::NApprox => "\\not\\approx",
        Op::Lt => "<",
        Op::Le => "\\le",
        Op::Gt => ">",
        Op::Ge => "\\ge",
        Op::Ngtr => "\\ngtr",
        Op::Nless => "\\nless",
        Op::In => "\\in",
        Op::NotIn => "\\notin",
        Op::Ni => "\\ni",
        Op::RightArrow => "\\rightarrow",
        Op::Perp => "\\perp",
        Op::Propto => "\\propto",
        Op::Subset => "\\subset",
        Op::NSubset => "\\not\\subset",
        Op::Subseteq => "\\subseteq",
        Op::NSubseteq => "\\not\\subseteq",
        Op::Supset => "\\supset",
        Op::NSupset => "\\not\\supset",
        Op::Supseteq => "\\supseteq",
        Op::NSupseteq => "\\not\\supseteq",
        Op::Parallel => "\\parallel",
        Op::Nparallel => "\\nparallel",
        Op::Sim => "\\sim",
        Op::NSim => "\\not\\sim",
        Op::Cong => "\\cong",
        Op::NCong => "\\not\\cong",
        Op::Implies => "\\Rightarrow",
        Op::Iff => "\\Leftrightarrow",
        Op::Pm => "\\pm",
        Op::Cup => "\\cup",
        Op::Cap => "\\cap",
        Op::Setminus => "\\setminus",
        Op::Backslash => "\\backslash",
        Op::Div => "\\div",
        _ => return None,
    })
}

fn function_name(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Sin => "\\sin",
        Op::Cos => "\\cos",
        Op::Tan => "\\tan",
        Op::Sec => "\\sec",
        Op::Csc => "\\csc",
        Op::Cot => "\\cot",
        Op::Sinh => "\\sinh",
        Op::Cosh => "\\cosh",
        Op::Tanh => "\\tanh",
        Op::Coth => "\\coth",
        Op::Arcsin => "\\arcsin",
        Op::Arccos => "\\arccos",
        Op::Arctan => "\\arctan",
        _ => return None,
    })
}

fn join(args: &[Node], sep: &str, out: &mut String) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        emit(arg, out);
    }
}

/// Emit the base of a script operator; composites get braces
fn emit_base(node: &Node, out: &mut String) {
    if node.is_leaf() {
        emit(node, out);
    } else {
        out.push('{');
        emit(node, out);
        out.push('}');
    }
}

/// Emit a super- or subscript; anything beyond one character gets braces
fn emit_script(node: &Node, out: &mut String) {
    let single = node
        .lexeme
        .as_deref()
        .map(|l| l.chars().count() == 1)
        .unwrap_or(false);
    if single {
        emit(node, out);
    } else {
        out.push('{');
        emit(node, out);
        out.push('}');
    }
}

fn emit(node: &Node, out: &mut String) {
    // a recorded non-default bracket pair wraps whatever the node renders as,
    // except for the bracket-carrying operators that render it themselves
    match node.op {
        Op::None => {}
        Op::Num | Op::Var => {
            if let Some(lexeme) = &node.lexeme {
                out.push_str(lexeme);
            }
        }
        Op::Text => {
            out.push_str("\\text{");
            if let Some(lexeme) = &node.lexeme {
                out.push_str(lexeme);
            }
            out.push('}');
        }
        Op::Add => {
            if node.flags.is_mixed_number && node.args.len() == 2 {
                emit(&node.args[0], out);
                emit(&node.args[1], out);
            } else if node.flags.is_repeating && node.args.len() == 2 {
                emit(&node.args[0], out);
                out.push_str("\\overline{");
                emit(&node.args[1], out);
                out.push('}');
            } else {
                join(&node.args, " + ", out);
            }
        }
        Op::Sub => {
            if node.args.len() == 1 {
                out.push('-');
                emit(&node.args[0], out);
            } else {
                join(&node.args, " - ", out);
            }
        }
        Op::Mul => {
            if node.flags.is_scientific && node.args.len() == 2 {
                emit(&node.args[0], out);
                out.push_str("\\times ");
                emit(&node.args[1], out);
            } else if node.flags.is_implicit {
                join(&node.args, " ", out);
            } else {
                join(&node.args, " \\cdot ", out);
            }
        }
        Op::Frac => {
            if node.flags.is_slash && node.args.len() == 2 {
                emit(&node.args[0], out);
                out.push('/');
                emit(&node.args[1], out);
            } else {
                out.push_str("\\frac");
                for arg in &node.args {
                    out.push('{');
                    emit(arg, out);
                    out.push('}');
                }
            }
        }
        Op::Pow => {
            if let [base, exp] = node.args.as_slice() {
                emit_base(base, out);
                out.push('^');
                emit_script(exp, out);
            }
        }
        Op::Subscript => {
            if let [base, sub] = node.args.as_slice() {
                emit_base(base, out);
                out.push('_');
                emit_script(sub, out);
            }
        }
        Op::Comma => join(&node.args, ", ", out),
        Op::Colon => join(&node.args, " : ", out),
        Op::Paren
        | Op::Bracket
        | Op::Interval
        | Op::IntervalOpen
        | Op::IntervalLeftOpen
        | Op::IntervalRightOpen => {
            let (l, r) = bracket_pair(node);
            out.push_str(l);
            join(&node.args, "", out);
            out.push_str(r);
        }
        Op::Set => {
            out.push_str("\\{");
            join(&node.args, "", out);
            out.push_str("\\}");
        }
        Op::Abs => {
            out.push('|');
            join(&node.args, "", out);
            out.push('|');
        }
        Op::AngleBracket => {
            out.push_str("\\langle ");
            join(&node.args, "", out);
            out.push_str("\\rangle ");
        }
        Op::EvalAt => {
            out.push_str("\\left.");
            join(&node.args, "", out);
            out.push_str("\\right|");
        }
        Op::Pipe => {
            if let [body, at] = node.args.as_slice() {
                emit(body, out);
                out.push_str("|_");
                emit_script(at, out);
            }
        }
        Op::Percent => {
            join(&node.args, "", out);
            out.push_str("\\%");
        }
        Op::Fact => {
            join(&node.args, "", out);
            out.push('!');
        }
        Op::Not => {
            out.push_str("\\not ");
            join(&node.args, "", out);
        }
        Op::Exists => {
            out.push_str("\\exists ");
            join(&node.args, "", out);
        }
        Op::Forall => {
            out.push_str("\\forall ");
            join(&node.args, "", out);
        }
        Op::Vec => wrap_command("\\vec", node, out),
        Op::Overline => wrap_command("\\overline", node, out),
        Op::Mathbf => wrap_command("\\mathbf", node, out),
        Op::Sqrt => wrap_command("\\sqrt", node, out),
        Op::Nthroot => {
            if let [index, arg] = node.args.as_slice() {
                out.push_str("\\sqrt[");
                emit(index, out);
                out.push_str("]{");
                emit(arg, out);
                out.push('}');
            }
        }
        Op::Log => {
            if let [base, arg] = node.args.as_slice() {
                match base.lexeme.as_deref() {
                    Some("e") => out.push_str("\\ln "),
                    Some("10") => out.push_str("\\log "),
                    _ => {
                        out.push_str("\\log_");
                        emit_script(base, out);
                        out.push(' ');
                    }
                }
                emit(arg, out);
            }
        }
        Op::Integral => emit_integral(node, out),
        Op::Deriv => emit_deriv(node, out),
        Op::Lim => {
            out.push_str("\\lim");
            if node.args.len() == 2 {
                out.push('_');
                emit_script(&node.args[0], out);
            }
            out.push(' ');
            if let Some(body) = node.args.last() {
                emit(body, out);
            }
        }
        Op::Sum => emit_big_op("\\sum", node, out),
        Op::Prod => emit_big_op("\\prod", node, out),
        Op::BigCup => emit_big_op("\\bigcup", node, out),
        Op::BigCap => emit_big_op("\\bigcap", node, out),
        Op::Matrix => emit_matrix(node, out),
        Op::Row => join(&node.args, " & ", out),
        Op::MolarMass => {
            out.push('M');
            join(&node.args, "", out);
        }
        op => {
            if let Some(sep) = infix_op(op) {
                join(&node.args, &format!(" {sep} "), out);
            } else if let Some(name) = function_name(op) {
                out.push_str(name);
                emit_function_arg(node.args.first(), out);
            }
        }
    }
}

fn wrap_command(name: &str, node: &Node, out: &mut String) {
    out.push_str(name);
    out.push('{');
    join(&node.args, "", out);
    out.push('}');
}

fn emit_function_arg(arg: Option<&Node>, out: &mut String) {
    let Some(arg) = arg else { return };
    if arg.op == Op::Paren {
        emit(arg, out);
    } else {
        out.push(' ');
        emit(arg, out);
    }
}

fn bracket_pair(node: &Node) -> (&'static str, &'static str) {
    let l = node.lbrk.map(Delim::latex).unwrap_or("(");
    let r = node.rbrk.map(Delim::latex).unwrap_or(")");
    // PAREN/BRACKET defaults when nothing was recorded
    if node.lbrk.is_none() && node.op == Op::Bracket {
        ("[", "]")
    } else {
        (l, r)
    }
}

fn emit_integral(node: &Node, out: &mut String) {
    out.push_str("\\int");
    let args = &node.args;
    let (bounds, rest) = match args.len() {
        4 => (&args[..2], &args[2..]),
        3 => (&args[..1], &args[1..]),
        _ => (&args[..0], &args[..]),
    };
    if let Some(lo) = bounds.first() {
        out.push('_');
        emit_script(lo, out);
    }
    if let Some(hi) = bounds.get(1) {
        out.push('^');
        emit_script(hi, out);
    }
    out.push(' ');
    if let Some(body) = rest.first() {
        emit(body, out);
    }
    if let Some(var) = rest.get(1) {
        out.push_str("\\,d");
        emit(var, out);
    }
}

fn emit_deriv(node: &Node, out: &mut String) {
    let order = node.args.get(2).and_then(|n| n.lexeme.as_deref());
    out.push_str("\\frac{d");
    if let Some(order) = order {
        out.push('^');
        out.push_str(order);
    }
    if let Some(target) = node.args.first() {
        emit(target, out);
    }
    out.push_str("}{d");
    if let Some(var) = node.args.get(1) {
        emit(var, out);
    }
    if let Some(order) = order {
        out.push('^');
        out.push_str(order);
    }
    out.push('}');
}

fn emit_big_op(name: &str, node: &Node, out: &mut String) {
    out.push_str(name);
    let args = &node.args;
    if args.len() >= 2 {
        out.push('_');
        emit_script(&args[0], out);
    }
    if args.len() >= 3 {
        out.push('^');
        emit_script(&args[1], out);
    }
    out.push(' ');
    if let Some(body) = args.last() {
        emit(body, out);
    }
}

fn emit_matrix(node: &Node, out: &mut String) {
    let env = match (node.lbrk, node.rbrk) {
        (Some(Delim::LParen), _) => "pmatrix",
        (Some(Delim::LBracket), _) => "bmatrix",
        (Some(Delim::Pipe), _) => "vmatrix",
        _ => "matrix",
    };
    out.push_str("\\begin{");
    out.push_str(env);
    out.push('}');
    join(&node.args, " \\\\ ", out);
    out.push_str("\\end{");
    out.push_str(env);
    out.push('}');
}
