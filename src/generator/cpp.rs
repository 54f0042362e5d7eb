//! C++ harness emitter.
//!
//! Each case body is wrapped in try/catch so thrown exceptions print an
//! error object and execution continues, but a signal death (segfault,
//! SIGFPE) still ends the process at the crash line; the executor reads
//! the missing lines as the terminal cause.

use anyhow::Result;
use serde_json::Value;

use super::{escape_string, format_number, input_pairs, is_integer_tag, split_tag};
use crate::models::Problem;

pub(super) fn generate(problem: &Problem) -> Result<String> {
    let mut out = String::new();

    out.push_str("#include <iostream>\n");
    out.push_str("#include <vector>\n");
    out.push_str("#include <string>\n");
    out.push_str("#include <sstream>\n");
    out.push_str("#include <iomanip>\n");
    out.push_str("#include <nlohmann/json.hpp>\n\n");
    out.push_str("using namespace std;\n\n");

    out.push_str("// USER_CODE_START\n");
    out.push_str(&format!(
        "{} {}(",
        project(&problem.return_type),
        problem.function_name
    ));
    for (i, param) in problem.parameters.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let ty = project(&param.type_tag);
        // Pass containers and strings by const reference.
        if ty.contains("vector") || ty == "string" {
            out.push_str(&format!("const {}& {}", ty, param.name));
        } else {
            out.push_str(&format!("{} {}", ty, param.name));
        }
    }
    out.push_str(") {\n");
    out.push_str("    // STUDENT_CODE_HERE\n");
    out.push_str("}\n");
    out.push_str("// USER_CODE_END\n\n");

    out.push_str("int main() {\n");
    out.push_str("    ios_base::sync_with_stdio(false);\n");
    out.push_str("    cin.tie(nullptr);\n\n");

    for (i, tc) in problem.test_cases.iter().enumerate() {
        out.push_str(&format!("    // Test case {}\n", i + 1));
        out.push_str("    try {\n");

        for (name, input) in input_pairs(problem, tc) {
            out.push_str(&format!(
                "        {} {} = {};\n",
                project(&input.type_tag),
                name,
                format_value(&input.value, &input.type_tag)
            ));
        }

        let args: Vec<&str> = problem
            .parameters
            .0
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        let call = format!("{}({})", problem.function_name, args.join(", "));

        if problem.return_type == "void" {
            out.push_str(&format!("        {};\n", call));
            out.push_str("        cout << \"null\" << endl;\n");
        } else {
            out.push_str(&format!("        auto result = {};\n", call));
            out.push_str(&format!(
                "        cout << {} << endl;\n",
                output_expr("result", &project(&problem.return_type))
            ));
        }

        out.push_str("    } catch (const exception& e) {\n");
        out.push_str("        cout << \"{\\\"error\\\": \\\"\" << e.what() << \"\\\"}\" << endl;\n");
        out.push_str("    }\n\n");
    }

    out.push_str("    return 0;\n");
    out.push_str("}\n");

    Ok(out)
}

/// Project a type tag onto a C++ type. Unknown base tags fall back to
/// `int`.
fn project(tag: &str) -> String {
    let (base, dims) = split_tag(tag);
    let projected = match base {
        "int" => "int",
        "long" => "long long",
        "float" => "float",
        "double" => "double",
        "bool" => "bool",
        "string" => "string",
        "char" => "char",
        "void" => "void",
        _ => "int",
    };
    let mut out = projected.to_string();
    for _ in 0..dims {
        out = format!("vector<{}>", out);
    }
    out
}

/// Expression that prints `var` as a JSON value.
fn output_expr(var: &str, cpp_type: &str) -> String {
    if cpp_type.contains("vector") {
        return format!("nlohmann::json({}).dump()", var);
    }
    match cpp_type {
        "string" => format!("\"\\\"\" << {} << \"\\\"\"", var),
        "bool" => format!("({} ? \"true\" : \"false\")", var),
        _ => var.to_string(),
    }
}

fn format_value(value: &Value, tag: &str) -> String {
    let (base, dims) = split_tag(tag);
    match value {
        Value::Array(items) => {
            let inner = if dims > 0 {
                format!("{}{}", base, "[]".repeat(dims - 1))
            } else {
                base.to_string()
            };
            let parts: Vec<String> = items.iter().map(|v| format_value(v, &inner)).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::String(s) => {
            if base == "char" {
                let c = s.chars().next().unwrap_or('\0');
                format!("'{}'", escape_char(c))
            } else {
                format!("\"{}\"", escape_string(s))
            }
        }
        Value::Number(n) => format_number(n, is_integer_tag(base)),
        Value::Bool(b) => b.to_string(),
        Value::Null => default_value(&project(tag)),
        other => other.to_string(),
    }
}

fn escape_char(c: char) -> String {
    match c {
        '\\' => "\\\\".to_string(),
        '\'' => "\\'".to_string(),
        '\0' => "\\0".to_string(),
        _ => c.to_string(),
    }
}

fn default_value(cpp_type: &str) -> String {
    if cpp_type.contains("vector") {
        return "{}".to_string();
    }
    match cpp_type {
        "int" | "long long" => "0".to_string(),
        "double" | "float" => "0.0".to_string(),
        "bool" => "false".to_string(),
        "string" => "\"\"".to_string(),
        "char" => "'\\0'".to_string(),
        _ => "{}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn harness_shape() {
        let problem = add_problem();
        let harness = generate(&problem).unwrap();

        assert!(harness.contains("int add(int a, int b) {"));
        assert!(harness.contains("    // STUDENT_CODE_HERE"));
        assert!(harness.contains("        int a = 2;\n        int b = 3;\n"));
        assert!(harness.contains("auto result = add(a, b);"));
        assert!(harness.contains("catch (const exception& e)"));
    }

    #[test]
    fn containers_pass_by_const_reference() {
        let problem = problem(
            "sumAll",
            "int",
            &[("xs", "int[]")],
            vec![case(
                1,
                vec![typed("int[]", json!([1, 2, 3]))],
                typed("int", json!(6)),
            )],
        );
        let harness = generate(&problem).unwrap();
        assert!(harness.contains("int sumAll(const vector<int>& xs) {"));
        assert!(harness.contains("vector<int> xs = {1, 2, 3};"));
    }

    #[test]
    fn vector_results_serialize_through_json() {
        let problem = problem(
            "firstTwo",
            "int[]",
            &[("n", "int")],
            vec![case(
                1,
                vec![typed("int", json!(5))],
                typed("int[]", json!([0, 1])),
            )],
        );
        let harness = generate(&problem).unwrap();
        assert!(harness.contains("vector<int> firstTwo(int n) {"));
        assert!(harness.contains("nlohmann::json(result).dump()"));
    }

    #[test]
    fn projection_table() {
        assert_eq!(project("long"), "long long");
        assert_eq!(project("int[][]"), "vector<vector<int>>");
        assert_eq!(project("string[]"), "vector<string>");
        assert_eq!(project("mystery"), "int");
    }

    #[test]
    fn void_return_prints_null() {
        let problem = problem(
            "loop",
            "void",
            &[],
            vec![case(1, vec![], typed("int", json!(0)))],
        );
        let harness = generate(&problem).unwrap();
        assert!(harness.contains("        loop();\n"));
        assert!(harness.contains("cout << \"null\" << endl;"));
    }

    #[test]
    fn char_and_null_literals() {
        assert_eq!(format_value(&json!("x"), "char"), "'x'");
        assert_eq!(format_value(&json!(null), "string"), "\"\"");
        assert_eq!(format_value(&json!(null), "int[]"), "{}");
    }
}
