//! Java harness emitter.

use anyhow::Result;
use serde_json::Value;

use super::{escape_string, format_number, input_pairs, is_integer_tag, split_tag};
use crate::models::Problem;

pub(super) fn generate(problem: &Problem) -> Result<String> {
    let mut out = String::new();

    out.push_str("import java.util.*;\n");
    out.push_str("import com.google.gson.Gson;\n\n");
    out.push_str("class Solution {\n");

    out.push_str("    // USER_CODE_START\n");
    out.push_str(&format!(
        "    public {} {}(",
        project(&problem.return_type),
        problem.function_name
    ));
    for (i, param) in problem.parameters.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{} {}", project(&param.type_tag), param.name));
    }
    out.push_str(") {\n");
    out.push_str("        // STUDENT_CODE_HERE\n");
    out.push_str("    }\n");
    out.push_str("    // USER_CODE_END\n");

    out.push_str("\n    public static void main(String[] args) {\n");
    out.push_str("        Solution solution = new Solution();\n");
    out.push_str("        Gson gson = new Gson();\n\n");

    for (i, tc) in problem.test_cases.iter().enumerate() {
        out.push_str(&format!("        // Test case {}\n", i + 1));
        out.push_str("        try {\n");

        for (name, input) in input_pairs(problem, tc) {
            out.push_str(&format!(
                "            {} {} = {};\n",
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
        let call = format!("solution.{}({})", problem.function_name, args.join(", "));

        if problem.return_type == "void" {
            out.push_str(&format!("            {};\n", call));
            out.push_str("            System.out.println(\"null\");\n");
        } else {
            out.push_str(&format!(
                "            {} result = {};\n",
                project(&problem.return_type),
                call
            ));
            out.push_str("            System.out.println(gson.toJson(result));\n");
        }

        out.push_str("        } catch (Exception e) {\n");
        out.push_str(
            "            System.out.println(\"{\\\"error\\\": \\\"\" + e.getMessage() + \"\\\"}\");\n",
        );
        out.push_str("        }\n\n");
    }

    out.push_str("    }\n");
    out.push_str("}\n");

    Ok(out)
}

/// Project a type tag onto a Java type. Unknown base tags fall back to
/// `int`.
fn project(tag: &str) -> String {
    let (base, dims) = split_tag(tag);
    let projected = match base {
        "int" => "int",
        "long" => "long",
        "float" => "float",
        "double" => "double",
        "bool" => "boolean",
        "string" => "String",
        "char" => "char",
        "void" => "void",
        _ => "int",
    };
    format!("{}{}", projected, "[]".repeat(dims))
}

fn format_value(value: &Value, tag: &str) -> String {
    let (base, dims) = split_tag(tag);

    if dims > 0 {
        let element_tag = format!("{}{}", base, "[]".repeat(dims - 1));
        let items: Vec<String> = match value {
            Value::Array(items) => items
                .iter()
                .map(|v| format_value(v, &element_tag))
                .collect(),
            _ => vec![],
        };
        let base_type = project(base);
        return format!(
            "new {}{}{{{}}}",
            base_type,
            "[]".repeat(dims),
            items.join(", ")
        );
    }

    match value {
        Value::String(s) => {
            if base == "char" {
                let c = s.chars().next().unwrap_or('\0');
                format!("'{}'", escape_char(c))
            } else {
                format!("\"{}\"", escape_string(s))
            }
        }
        Value::Number(n) => {
            let formatted = format_number(n, is_integer_tag(base));
            match base {
                "long" => format!("{}L", formatted),
                "float" => format!("{}f", formatted),
                _ => formatted,
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
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
