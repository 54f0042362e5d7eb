//! Python harness emitter.

use anyhow::Result;
use serde_json::Value;

use super::{escape_string, format_number, input_pairs, is_integer_tag, split_tag};
use crate::models::Problem;

pub(super) fn generate(problem: &Problem) -> Result<String> {
    let mut out = String::new();

    out.push_str("import json\n");
    out.push_str("import sys\n");
    out.push_str("from typing import List, Optional\n\n");

    // Function shell with the placeholder for the student's body.
    out.push_str("# USER_CODE_START\n");
    out.push_str(&format!("def {}(", problem.function_name));
    for (i, param) in problem.parameters.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{}: {}", param.name, project(&param.type_tag)));
    }
    out.push_str(&format!(") -> {}:\n", project(&problem.return_type)));
    out.push_str("    # STUDENT_CODE_HERE\n");
    out.push_str("# USER_CODE_END\n\n");

    out.push_str("if __name__ == \"__main__\":\n");

    for (i, tc) in problem.test_cases.iter().enumerate() {
        out.push_str(&format!("    # Test case {}\n", i + 1));
        out.push_str("    try:\n");

        for (name, input) in input_pairs(problem, tc) {
            out.push_str(&format!(
                "        {} = {}\n",
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
        out.push_str(&format!(
            "        result = {}({})\n",
            problem.function_name,
            args.join(", ")
        ));
        out.push_str("        print(json.dumps(result))\n");
        out.push_str("    except Exception as e:\n");
        out.push_str("        print(json.dumps({\"error\": str(e)}))\n\n");
    }

    Ok(out)
}

/// Project a type tag onto a Python annotation. Unknown base tags fall
/// back to `int`.
fn project(tag: &str) -> String {
    let (base, dims) = split_tag(tag);
    let projected = match base {
        "int" | "long" => "int",
        "float" | "double" => "float",
        "bool" => "bool",
        "string" | "char" => "str",
        "void" => "None",
        _ => "int",
    };
    let mut out = projected.to_string();
    for _ in 0..dims {
        out = format!("List[{}]", out);
    }
    out
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
            format!("[{}]", parts.join(", "))
        }
        Value::String(s) => format!("\"{}\"", escape_string(s)),
        Value::Number(n) => format_number(n, is_integer_tag(base)),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}
