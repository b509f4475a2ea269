/// Convert snake_case or kebab-case to PascalCase.
///
/// Normalizes words separated by `_`, `-`, or `.`. If the input is already
/// PascalCase (starts uppercase, no separators), it is returned unchanged.
///
/// # Examples
/// ```
/// use graft_core::utils::to_pascal_case;
/// assert_eq!(to_pascal_case("binary_expression"), "BinaryExpression");
/// assert_eq!(to_pascal_case("ERROR"), "Error");
/// assert_eq!(to_pascal_case("Program"), "Program");  // idempotent
/// ```
pub fn to_pascal_case(s: &str) -> String {
    fn is_separator(c: char) -> bool {
        matches!(c, '_' | '-' | '.')
    }

    let has_separator = s.chars().any(is_separator);
    let has_lowercase = s.chars().any(|c| c.is_ascii_lowercase());
    let starts_uppercase = s.chars().next().is_some_and(|c| c.is_ascii_uppercase());

    if starts_uppercase && has_lowercase && !has_separator {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = true;
    for c in s.chars() {
        if is_separator(c) {
            capitalize_next = true;
            continue;
        }
        if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c.to_ascii_lowercase());
        }
    }
    result
}

/// Name of the specialized node class for a grammar type.
///
/// ```
/// use graft_core::utils::node_class_name;
/// assert_eq!(node_class_name("binary_expression"), "BinaryExpressionNode");
/// ```
pub fn node_class_name(type_name: &str) -> String {
    format!("{}Node", to_pascal_case(type_name))
}

/// Accessor name for a field: `<field>_node`, or `<field>_nodes` when repeated.
///
/// ```
/// use graft_core::utils::field_accessor_name;
/// assert_eq!(field_accessor_name("left", false), "left_node");
/// assert_eq!(field_accessor_name("arguments", true), "arguments_nodes");
/// ```
pub fn field_accessor_name(field_name: &str, multiple: bool) -> String {
    if multiple {
        format!("{field_name}_nodes")
    } else {
        format!("{field_name}_node")
    }
}
