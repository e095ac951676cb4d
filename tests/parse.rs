//! Whole-parse acceptance tests: source in, exact tree out

use latex_math_parser::{
    parse, parse_with_env, Delim, Environment, ErrorCode, Node, Op, Options, Symbol, SymbolKind,
};
use pretty_assertions::assert_eq;

fn ok(src: &str) -> Node {
    parse(Options::default(), src).unwrap()
}

fn err_code(src: &str) -> ErrorCode {
    parse(Options::default(), src).unwrap_err().code
}

fn chem_env() -> Environment {
    ["H", "O", "Na", "Cl", "Fe"]
        .into_iter()
        .map(|el| (el, Symbol::new(SymbolKind::Element)))
        .collect()
}

#[test]
fn addition() {
    assert_eq!(
        ok("1 + 2"),
        Node::nary(Op::Add, vec![Node::num("1"), Node::num("2")])
    );
}

#[test]
fn fraction_flagged() {
    let mut expected = Node::binary(Op::Frac, Node::num("1"), Node::num("2"));
    expected.flags.is_fraction = true;
    assert_eq!(ok(r"\frac{1}{2}"), expected);
}

#[test]
fn mixed_number() {
    let mut frac = Node::binary(Op::Frac, Node::num("1"), Node::num("2"));
    frac.flags.is_fraction = true;
    let mut expected = Node::binary(Op::Add, Node::num("3"), frac);
    expected.flags.is_mixed_number = true;
    assert_eq!(ok(r"3\frac{1}{2}"), expected);
}

#[test]
fn mixed_number_from_slash() {
    let node = ok("3 1/2");
    assert!(node.flags.is_mixed_number);
    assert_eq!(node.op, Op::Add);
    assert!(node.args[1].flags.is_slash);
}

#[test]
fn improper_fraction_multiplies_instead() {
    let node = ok(r"3\frac{5}{2}");
    assert_eq!(node.op, Op::Mul);
    assert!(node.flags.is_implicit);
}

#[test]
fn inverse_sine() {
    let paren =
        Node::unary(Op::Paren, Node::var("x")).with_brackets(Delim::LParen, Delim::RParen);
    assert_eq!(ok(r"\sin^{-1}(x)"), Node::unary(Op::Arcsin, paren));
}

#[test]
fn sine_squared_keeps_the_power() {
    let node = ok(r"\sin^2 x");
    assert_eq!(node.op, Op::Pow);
    assert_eq!(node.args[0].op, Op::Sin);
    assert_eq!(node.args[1], Node::num("2"));
}

#[test]
fn sine_binds_implicit_products() {
    let node = ok(r"\sin 2x");
    assert_eq!(node.op, Op::Sin);
    let arg = &node.args[0];
    assert_eq!(arg.op, Op::Mul);
    assert!(arg.flags.is_implicit);
    assert!(arg.flags.is_polynomial_term);
    assert_eq!(arg.args, vec![Node::num("2"), Node::var("x")]);
}

#[test]
fn definite_integral() {
    let expected = Node::nary_grouped(
        Op::Integral,
        vec![
            Node::num("0"),
            Node::num("1"),
            Node::var("x"),
            Node::var("x"),
        ],
    );
    assert_eq!(ok(r"\int_0^1 x\,dx"), expected);
}

#[test]
fn integral_without_dx_is_fatal() {
    assert_eq!(err_code(r"\int x"), ErrorCode::MissingIntegrationVariable);
}

#[test]
fn integral_of_bare_dx() {
    let node = ok(r"\int dx");
    assert_eq!(
        node,
        Node::nary_grouped(Op::Integral, vec![Node::num("1"), Node::var("x")])
    );
}

#[test]
fn integral_through_a_fraction() {
    let node = ok(r"\int \frac{dx}{x}");
    assert_eq!(node.op, Op::Integral);
    let integrand = &node.args[0];
    assert_eq!(integrand.op, Op::Frac);
    assert_eq!(integrand.args[0], Node::num("1"));
    assert_eq!(integrand.args[1], Node::var("x"));
    assert_eq!(node.args[1], Node::var("x"));
}

#[test]
fn double_integral_nests() {
    let node = ok(r"\iint x y \, dx \, dy");
    assert_eq!(node.op, Op::Integral);
    assert_eq!(node.args[1], Node::var("y"));
    let inner = &node.args[0];
    assert_eq!(inner.op, Op::Integral);
    assert_eq!(inner.args[1], Node::var("x"));
}

#[test]
fn repeating_decimal() {
    let mut zero = Node::num("0.");
    zero.separator_count = 1;
    zero.last_separator_index = Some(2);
    zero.flags.is_repeating = true;
    let mut three = Node::num("3");
    three.flags.is_repeating = true;
    let mut expected = Node::binary(Op::Add, zero, three);
    expected.flags.is_repeating = true;
    assert_eq!(ok(r"0.\overline{3}"), expected);
}

#[test]
fn repeating_decimal_with_dots() {
    let node = ok(r"0.\dot{3}4\dot{5}");
    assert!(node.flags.is_repeating);
    assert_eq!(node.args[1].lexeme.as_deref(), Some("345"));
}

#[test]
fn thousands_separator_bookkeeping() {
    let opts = Options {
        set_thousands_separator: vec![','],
        ..Options::default()
    };
    let node = parse(opts, "1{,}234.5").unwrap();
    assert_eq!(node.op, Op::Num);
    assert_eq!(node.lexeme.as_deref(), Some("1234.5"));
    assert_eq!(node.separator_count, 2);
    assert_eq!(
        node.number_format,
        Some(latex_math_parser::NumberFormat::Decimal)
    );
}

#[test]
fn separator_conflict_is_rejected() {
    let opts = Options {
        set_thousands_separator: vec![','],
        set_decimal_separator: vec![','],
        ..Options::default()
    };
    assert_eq!(
        parse(opts, "1").unwrap_err().code,
        ErrorCode::SeparatorConflict
    );
}

#[test]
fn right_open_interval() {
    let body = Node::nary_grouped(Op::Comma, vec![Node::num("1"), Node::num("2")]);
    let expected = Node::unary(Op::IntervalRightOpen, body)
        .with_brackets(Delim::LBracket, Delim::RParen);
    assert_eq!(ok("[1,2)"), expected);
}

#[test]
fn interval_variants() {
    assert_eq!(ok("(1,2)").op, Op::IntervalOpen);
    assert_eq!(ok("[1,2]").op, Op::Interval);
    assert_eq!(ok("(1,2]").op, Op::IntervalLeftOpen);
}

#[test]
fn french_intervals_normalize() {
    let open = ok("]1,2[");
    assert_eq!(open.op, Op::IntervalOpen);
    assert_eq!(open.lbrk, Some(Delim::LParen));
    assert_eq!(open.rbrk, Some(Delim::RParen));
    assert_eq!(ok("]1,2]").op, Op::IntervalLeftOpen);
    assert_eq!(ok("[1,2[").op, Op::IntervalRightOpen);
}

#[test]
fn three_element_tuple_is_not_an_interval() {
    let node = ok("(1,2,3)");
    assert_eq!(node.op, Op::Paren);
    assert_eq!(node.args[0].op, Op::Comma);
    assert_eq!(node.args[0].args.len(), 3);
}

#[test]
fn chained_equality_reifies() {
    let expected = Node::nary_grouped(
        Op::Comma,
        vec![
            Node::binary(Op::Eql, Node::var("a"), Node::var("b")),
            Node::binary(Op::Eql, Node::var("b"), Node::var("c")),
        ],
    );
    assert_eq!(ok("a=b=c"), expected);
}

#[test]
fn mixed_relation_chain() {
    let node = ok(r"a < b \le c");
    assert_eq!(node.op, Op::Comma);
    assert_eq!(node.args[0].op, Op::Lt);
    assert_eq!(node.args[1].op, Op::Le);
}

#[test]
fn scientific_e_notation() {
    let mut expected = Node::nary_grouped(
        Op::Mul,
        vec![
            Node::num("3"),
            Node::binary(Op::Pow, Node::num("10"), Node::num("4")),
        ],
    );
    expected.flags.is_scientific = true;
    assert_eq!(ok(r"3\text{E}4"), expected);
}

#[test]
fn scientific_times_form() {
    let node = ok(r"1.5\times 10^8");
    assert!(node.flags.is_scientific);
    assert_eq!(node.op, Op::Mul);
    assert_eq!(node.args[1].op, Op::Pow);
}

#[test]
fn plain_times_is_not_scientific() {
    let node = ok(r"2\times x");
    assert!(!node.flags.is_scientific);
}

#[test]
fn adjacent_numbers_error() {
    assert_eq!(err_code("2 3"), ErrorCode::NumbersWithoutOperator);
}

#[test]
fn derivative_fraction() {
    assert_eq!(
        ok(r"\frac{dy}{dx}"),
        Node::nary_grouped(Op::Deriv, vec![Node::var("y"), Node::var("x")])
    );
}

#[test]
fn derivative_operator_takes_following_factor() {
    let node = ok(r"\frac{d}{dx} y");
    assert_eq!(
        node,
        Node::nary_grouped(Op::Deriv, vec![Node::var("y"), Node::var("x")])
    );
}

#[test]
fn second_derivative_records_order() {
    let node = ok(r"\frac{d^2y}{dx^2}");
    assert_eq!(node.op, Op::Deriv);
    assert_eq!(node.args.len(), 3);
    assert_eq!(node.args[2], Node::num("2"));
}

#[test]
fn log_defaults_to_base_ten() {
    assert_eq!(
        ok(r"\log x"),
        Node::binary(Op::Log, Node::num("10"), Node::var("x"))
    );
    assert_eq!(
        ok(r"\ln x"),
        Node::binary(Op::Log, Node::var("e"), Node::var("x"))
    );
    assert_eq!(
        ok(r"\log_2 x"),
        Node::binary(Op::Log, Node::num("2"), Node::var("x"))
    );
}

#[test]
fn sum_with_bounds() {
    let node = ok(r"\sum_{i=1}^n x");
    assert_eq!(node.op, Op::Sum);
    assert_eq!(node.args.len(), 3);
    assert_eq!(node.args[0].op, Op::Eql);
    assert_eq!(node.args[1], Node::var("n"));
}

#[test]
fn limit_with_subscript() {
    let node = ok(r"\lim_{x \rightarrow 0} x");
    assert_eq!(node.op, Op::Lim);
    assert_eq!(node.args.len(), 2);
    assert_eq!(node.args[0].op, Op::RightArrow);
}

#[test]
fn matrix_rows_and_cells() {
    let node = ok(r"\begin{pmatrix} 1 & 2 \\ 3 & 4 \end{pmatrix}");
    assert_eq!(node.op, Op::Matrix);
    assert_eq!(node.lbrk, Some(Delim::LParen));
    assert_eq!(node.args.len(), 2);
    assert_eq!(node.args[0].op, Op::Row);
    assert_eq!(node.args[0].args, vec![Node::num("1"), Node::num("2")]);
}

#[test]
fn array_column_spec_is_consumed() {
    let node = ok(r"\begin{array}{cc} 1 & 2 \end{array}");
    assert_eq!(node.op, Op::Matrix);
    assert_eq!(node.args[0].args.len(), 2);
}

#[test]
fn absolute_value() {
    let node = ok("|x - 1|");
    assert_eq!(node.op, Op::Abs);
    assert_eq!(node.args[0].op, Op::Sub);
}

#[test]
fn nested_absolute_values() {
    let node = ok(r"\left| |x| - 1 \right|");
    assert_eq!(node.op, Op::Abs);
    assert_eq!(node.args[0].args[0].op, Op::Abs);
}

#[test]
fn evaluation_at_a_point() {
    let node = ok(r"\left. x^2 \right|_2");
    assert_eq!(node.op, Op::Subscript);
    assert_eq!(node.args[0].op, Op::EvalAt);
    assert_eq!(node.args[0].rbrk, Some(Delim::Pipe));
}

#[test]
fn angle_brackets() {
    let node = ok(r"\langle 1, 2 \rangle");
    assert_eq!(node.op, Op::AngleBracket);
    assert_eq!(node.args[0].op, Op::Comma);
}

#[test]
fn set_literals_wrap_under_union() {
    let node = ok(r"\{1, 2\} \cup \{3\}");
    assert_eq!(node.op, Op::Cup);
    assert_eq!(node.args[0].op, Op::Set);
    assert_eq!(node.args[0].lbrk, Some(Delim::LSetBrace));
}

#[test]
fn empty_braces_are_an_empty_comma() {
    let node = ok("{}");
    assert_eq!(node.op, Op::Comma);
    assert!(node.args.is_empty());
}

#[test]
fn percent_and_factorial() {
    assert_eq!(ok("5%"), Node::unary(Op::Percent, Node::num("5")));
    assert_eq!(ok("5!"), Node::unary(Op::Fact, Node::num("5")));
}

#[test]
fn primes_attach_as_powers() {
    let node = ok("f''");
    assert_eq!(node, Node::binary(Op::Pow, Node::var("f"), Node::var("''")));
}

#[test]
fn units_from_the_environment() {
    let env: Environment = [
        ("kg", Symbol::new(SymbolKind::Unit)),
        ("mol", Symbol::new(SymbolKind::Unit)),
    ]
    .into_iter()
    .collect();
    let node = parse_with_env(Options::default(), "5kg", &env).unwrap();
    assert_eq!(node.op, Op::Mul);
    assert_eq!(node.args[1], Node::var("kg"));
}

#[test]
fn chemistry_ion_exponent() {
    let env = chem_env();
    let node = parse_with_env(Options::default(), "Na^+", &env).unwrap();
    assert_eq!(node, Node::binary(Op::Pow, Node::var("Na"), Node::var("+")));
}

#[test]
fn chemistry_ion_suffix_in_braces() {
    let env = chem_env();
    let node = parse_with_env(Options::default(), "{Cl-}", &env).unwrap();
    assert_eq!(node, Node::binary(Op::Pow, Node::var("Cl"), Node::var("-")));
}

#[test]
fn molar_mass_operator() {
    let env = chem_env();
    let node = parse_with_env(Options::default(), "M(H)", &env).unwrap();
    assert_eq!(node.op, Op::MolarMass);
    assert_eq!(node.args[0].op, Op::Paren);
}

#[test]
fn degree_superscript() {
    let node = ok(r"25^\circ C");
    assert_eq!(node.op, Op::Mul);
    assert_eq!(node.args[1], Node::var("\\degree"));
    assert_eq!(node.args[2], Node::var("C"));
}

#[test]
fn negative_degrees_re_enter() {
    let node = ok(r"-5\degree");
    assert_eq!(node.op, Op::Sub);
    assert_eq!(node.args.len(), 1);
    assert_eq!(node.args[0].op, Op::Mul);
}

#[test]
fn strict_rejects_unknown_primaries() {
    let opts = Options {
        strict: true,
        ..Options::default()
    };
    assert_eq!(
        parse(opts, "= 1").unwrap_err().code,
        ErrorCode::ExpressionExpected
    );
}

#[test]
fn empty_input_is_none() {
    assert_eq!(ok(""), Node::none());
}

#[test]
fn extra_input_is_reported() {
    assert_eq!(err_code("1 2 )"), ErrorCode::NumbersWithoutOperator);
    assert_eq!(err_code("1 )"), ErrorCode::ExtraInput);
}

#[test]
fn nth_root() {
    let node = ok(r"\sqrt[3]{8}");
    assert_eq!(
        node,
        Node::binary(Op::Nthroot, Node::num("3"), Node::num("8"))
    );
}

#[test]
fn subscript_power_normalization() {
    assert_eq!(ok("x^2_1"), ok("x_1^2"));
}

#[test]
fn num_lexemes_stay_canonical() {
    fn walk(node: &Node, check: &mut impl FnMut(&Node)) {
        check(node);
        for arg in &node.args {
            walk(arg, check);
        }
    }
    let opts = Options {
        allow_thousands_separator: true,
        ..Options::default()
    };
    for src in [
        "1 + 2.5",
        "1,234,567 + 0.",
        r"3\frac{1}{2}",
        r"\int_0^1 x\,dx",
        r"0.\overline{3}",
    ] {
        let tree = parse(opts.clone(), src).unwrap();
        walk(&tree, &mut |node| {
            if node.op == Op::Num {
                let lexeme = node.lexeme.as_deref().unwrap();
                let canonical = lexeme == "\\infty"
                    || lexeme
                        .strip_prefix('-')
                        .unwrap_or(lexeme)
                        .split_once('.')
                        .map(|(int, frac)| {
                            !int.is_empty()
                                && int.bytes().all(|b| b.is_ascii_digit())
                                && frac.bytes().all(|b| b.is_ascii_digit())
                        })
                        .unwrap_or_else(|| lexeme.bytes().all(|b| b.is_ascii_digit()));
                assert!(canonical, "non-canonical NUM lexeme {lexeme:?} in {src:?}");
            }
        });
    }
}

#[test]
fn unary_arity_contracts() {
    for (src, op) in [
        ("-x", Op::Sub),
        ("+x", Op::Add),
        ("5%", Op::Percent),
        ("5!", Op::Fact),
        (r"\vec{v}", Op::Vec),
        (r"\overline{x}", Op::Overline),
        (r"\mathbf{A}", Op::Mathbf),
        ("|x|", Op::Abs),
        ("(x+1)", Op::Paren),
    ] {
        let node = parse(Options::default(), src).unwrap();
        assert_eq!(node.op, op, "{src}");
        assert_eq!(node.args.len(), 1, "{src}");
    }
}
