//! Lightweight GLSL declaration scanner and dialect rewriter.
//!
//! [`scan_uniforms`] finds top-level `uniform` declarations (plain and block
//! members) without a full front end; backends with no compiler reflection
//! use it. [`to_vulkan`] rewrites WebGL-style fragment shaders into the
//! explicit-binding GLSL 450 that naga accepts, keeping every line in place.

use std::collections::HashMap;

use crate::backend::UniformKind;

const QUALIFIERS: &[&str] = &["highp", "mediump", "lowp", "const", "flat", "readonly"];

/// Uniform name -> declared kind, for every top-level uniform in `source`.
pub fn scan_uniforms(source: &str) -> HashMap<String, UniformKind> {
    let tokens = tokenize(&strip_comments(source));
    let mut uniforms = HashMap::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].as_str() {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            "uniform" if depth == 0 => {
                i = parse_uniform(&tokens, i + 1, &mut uniforms);
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    uniforms
}

/// Parses after the `uniform` keyword; returns the index past the closing `;`.
fn parse_uniform(tokens: &[String], mut i: usize, out: &mut HashMap<String, UniformKind>) -> usize {
    while i < tokens.len() && QUALIFIERS.contains(&tokens[i].as_str()) {
        i += 1;
    }
    if i + 1 >= tokens.len() {
        return tokens.len();
    }
    if tokens[i + 1] == "{" {
        // Interface block: `uniform Name { type a; type b, c; } instance;`
        i += 2;
        while i < tokens.len() && tokens[i] != "}" {
            i = parse_declarators(tokens, i, out);
        }
        return skip_past_semicolon(tokens, i);
    }
    let end = parse_declarators(tokens, i, out);
    end.min(tokens.len())
}

/// `type name [, name]* ;` with optional qualifiers and array suffixes.
fn parse_declarators(tokens: &[String], mut i: usize, out: &mut HashMap<String, UniformKind>) -> usize {
    while i < tokens.len() && QUALIFIERS.contains(&tokens[i].as_str()) {
        i += 1;
    }
    let Some(ty) = tokens.get(i) else {
        return tokens.len();
    };
    let kind = UniformKind::from_glsl(ty);
    i += 1;
    while i < tokens.len() {
        let token = &tokens[i];
        if token == ";" {
            return i + 1;
        }
        if token == "}" {
            return i;
        }
        if token == "[" {
            while i < tokens.len() && tokens[i] != "]" {
                i += 1;
            }
        } else if token != "," && is_identifier(token) {
            out.insert(token.clone(), kind.clone());
        }
        i += 1;
    }
    i
}

fn skip_past_semicolon(tokens: &[String], mut i: usize) -> usize {
    while i < tokens.len() && tokens[i] != ";" {
        i += 1;
    }
    i + 1
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            for next in chars.by_ref() {
                if next == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for next in chars.by_ref() {
                if prev == '*' && next == '/' {
                    break;
                }
                prev = next;
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn tokenize(source: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in source.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            current.push(c);
            continue;
        }
        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

// ---------------------------------------------------------------------------
// WebGL-style -> GLSL 450 rewrite
// ---------------------------------------------------------------------------

/// Name of the block that collects loose (non-opaque) uniforms.
pub const UNIFORM_BLOCK: &str = "ShadergraphParams";

/// Suffix of the separate sampler paired with each `sampler2D` uniform.
pub const SAMPLER_SUFFIX: &str = "Sampler";

/// Fragment source in explicit-binding GLSL 450.
#[derive(Debug, Clone, PartialEq)]
pub struct VulkanGlsl {
    pub text: String,
    /// Lines inserted above the first input line.
    pub line_offset: u32,
}

#[derive(Debug)]
enum Line {
    Version,
    Precision,
    Loose(String),
    Samplers(Vec<String>),
    Varying,
    Code,
}

/// Rewrites `source` for a Vulkan GLSL front end:
/// `#version` becomes `450`, precision statements are blanked, loose
/// uniforms move into one `std140` block at binding 0, every
/// `uniform sampler2D x` splits into `texture2D x` + `sampler xSampler`
/// (and uses of `x` become `sampler2D(x, xSampler)`), and unlocated
/// `in`/`out` globals get sequential locations.
///
/// Sources that already use explicit layouts pass through unchanged apart
/// from the version line.
pub fn to_vulkan(source: &str) -> VulkanGlsl {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut kinds = Vec::with_capacity(lines.len());
    let mut members = Vec::new();
    let mut samplers: Vec<String> = Vec::new();
    let mut first_loose = None;
    let mut has_version = false;
    let mut depth = 0i32;

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line).trim();
        let kind = if depth > 0 {
            Line::Code
        } else {
            classify(code)
        };
        match &kind {
            Line::Version => has_version = true,
            Line::Loose(member) => {
                members.push(member.clone());
                first_loose.get_or_insert(idx);
            }
            Line::Samplers(names) => samplers.extend(names.iter().cloned()),
            _ => {}
        }
        depth += brace_delta(code);
        kinds.push(kind);
    }

    let mut out = Vec::with_capacity(lines.len() + 1);
    let line_offset = if has_version {
        0
    } else {
        out.push("#version 450".to_string());
        1
    };
    let mut next_binding = 1u32;
    let mut next_in = 0u32;
    let mut next_out = 0u32;
    for (idx, (line, kind)) in lines.iter().zip(&kinds).enumerate() {
        let rewritten = match kind {
            Line::Version => "#version 450".to_string(),
            Line::Precision => String::new(),
            Line::Loose(_) if Some(idx) == first_loose => format!(
                "layout(set = 0, binding = 0) uniform {} {{ {} }};",
                UNIFORM_BLOCK,
                members.join(" ")
            ),
            Line::Loose(_) => String::new(),
            Line::Samplers(names) => names
                .iter()
                .map(|name| {
                    let binding = next_binding;
                    next_binding += 2;
                    format!(
                        "layout(set = 0, binding = {}) uniform texture2D {}; \
layout(set = 0, binding = {}) uniform sampler {}{};",
                        binding,
                        name,
                        binding + 1,
                        name,
                        SAMPLER_SUFFIX
                    )
                })
                .collect::<Vec<_>>()
                .join(" "),
            Line::Varying => {
                let trimmed = line.trim_start();
                let location = if trimmed.starts_with("in") {
                    next_in += 1;
                    next_in - 1
                } else {
                    next_out += 1;
                    next_out - 1
                };
                format!("layout(location = {}) {}", location, trimmed)
            }
            Line::Code => wrap_samplers(line, &samplers),
        };
        out.push(rewritten);
    }

    VulkanGlsl {
        text: out.join("\n"),
        line_offset,
    }
}

fn classify(code: &str) -> Line {
    if code.starts_with("#version") {
        return Line::Version;
    }
    if code.starts_with("precision ") && code.ends_with(';') {
        return Line::Precision;
    }
    if let Some(rest) = code.strip_prefix("uniform ") {
        if !code.ends_with(';') || code.contains('{') {
            return Line::Code;
        }
        let mut rest = rest.trim_end_matches(';').trim();
        while let Some((word, tail)) = rest.split_once(char::is_whitespace) {
            if !QUALIFIERS.contains(&word) {
                break;
            }
            rest = tail.trim_start();
        }
        let Some((ty, declarators)) = rest.split_once(char::is_whitespace) else {
            return Line::Code;
        };
        if ty == "sampler2D" {
            return Line::Samplers(
                declarators
                    .split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| is_identifier(name))
                    .collect(),
            );
        }
        return Line::Loose(format!("{} {};", ty, declarators.trim()));
    }
    if (code.starts_with("in ") || code.starts_with("out ")) && code.ends_with(';') && !code.contains('(') {
        return Line::Varying;
    }
    Line::Code
}

/// The line with any `//` comment removed.
fn code_part(line: &str) -> &str {
    match line.find("//") {
        Some(at) => &line[..at],
        None => line,
    }
}

fn brace_delta(code: &str) -> i32 {
    code.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// Replaces whole-identifier uses of each sampler name outside comments.
fn wrap_samplers(line: &str, samplers: &[String]) -> String {
    if samplers.is_empty() {
        return line.to_string();
    }
    let (code, comment) = line.split_at(code_part(line).len());
    let mut out = String::with_capacity(line.len());
    let mut ident = String::new();
    let flush = |ident: &mut String, out: &mut String| {
        if samplers.iter().any(|s| s == ident.as_str()) {
            out.push_str(&format!("sampler2D({}, {}{})", ident, ident, SAMPLER_SUFFIX));
        } else {
            out.push_str(ident);
        }
        ident.clear();
    };
    for c in code.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            ident.push(c);
            continue;
        }
        if !ident.is_empty() {
            flush(&mut ident, &mut out);
        }
        out.push(c);
    }
    if !ident.is_empty() {
        flush(&mut ident, &mut out);
    }
    out.push_str(comment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_declarations() {
        let src = "#version 300 es\n\
precision highp float;\n\
uniform float uTime;\n\
uniform highp vec2 uResolution, uTexelSize;\n\
uniform sampler2D uSrc; // input\n\
uniform vec3 uColors[4];\n\
/* uniform vec4 uHidden; */\n\
void main() { float uniformish = 1.0; }\n";
        let u = scan_uniforms(src);
        assert_eq!(u.get("uTime"), Some(&UniformKind::Float));
        assert_eq!(u.get("uResolution"), Some(&UniformKind::Vec2));
        assert_eq!(u.get("uTexelSize"), Some(&UniformKind::Vec2));
        assert_eq!(u.get("uSrc"), Some(&UniformKind::Texture2D));
        assert_eq!(u.get("uColors"), Some(&UniformKind::Vec3));
        assert!(!u.contains_key("uHidden"));
        assert_eq!(u.len(), 5);
    }

    #[test]
    fn test_block_members_and_separate_textures() {
        let src = "#version 450\n\
layout(set = 0, binding = 0) uniform Params {\n\
    float uTime;\n\
    vec2 uResolution;\n\
    int uMode;\n\
};\n\
layout(set = 1, binding = 0) uniform texture2D uSrc;\n\
layout(set = 1, binding = 1) uniform sampler uSrcSampler;\n";
        let u = scan_uniforms(src);
        assert_eq!(u.get("uTime"), Some(&UniformKind::Float));
        assert_eq!(u.get("uResolution"), Some(&UniformKind::Vec2));
        assert_eq!(u.get("uMode"), Some(&UniformKind::Other("int".into())));
        assert_eq!(u.get("uSrc"), Some(&UniformKind::Texture2D));
        assert_eq!(u.get("uSrcSampler"), Some(&UniformKind::Other("sampler".into())));
        assert!(!u.contains_key("Params"));
    }

    #[test]
    fn test_to_vulkan_keeps_line_count() {
        let src = "#version 300 es\n\
precision highp float;\n\
uniform float uTime;\n\
uniform sampler2D uSrc, uMask; // inputs\n\
uniform vec2 uResolution;\n\
in vec2 vUv;\n\
out vec4 fragColor;\n\
void main() {\n\
fragColor = texture(uSrc, vUv) * texture(uMask, vUv).r * uTime; // uSrc\n\
}";
        let out = to_vulkan(src);
        assert_eq!(out.line_offset, 0);
        let lines: Vec<&str> = out.text.split('\n').collect();
        assert_eq!(lines.len(), src.split('\n').count());
        assert_eq!(lines[0], "#version 450");
        assert_eq!(lines[1], "");
        assert_eq!(
            lines[2],
            "layout(set = 0, binding = 0) uniform ShadergraphParams { float uTime; vec2 uResolution; };"
        );
        assert!(lines[3].contains("layout(set = 0, binding = 1) uniform texture2D uSrc;"));
        assert!(lines[3].contains("layout(set = 0, binding = 2) uniform sampler uSrcSampler;"));
        assert!(lines[3].contains("layout(set = 0, binding = 3) uniform texture2D uMask;"));
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "layout(location = 0) in vec2 vUv;");
        assert_eq!(lines[6], "layout(location = 0) out vec4 fragColor;");
        assert_eq!(
            lines[8],
            "fragColor = texture(sampler2D(uSrc, uSrcSampler), vUv) * \
texture(sampler2D(uMask, uMaskSampler), vUv).r * uTime; // uSrc"
        );
    }

    #[test]
    fn test_to_vulkan_without_version_prepends_one() {
        let out = to_vulkan("uniform float uTime;\nvoid main() {}");
        assert_eq!(out.line_offset, 1);
        assert!(out.text.starts_with("#version 450\nlayout(set = 0, binding = 0) uniform"));
    }

    #[test]
    fn test_to_vulkan_leaves_explicit_layouts() {
        let src = "#version 450\n\
layout(location = 0) in vec2 vUv;\n\
layout(set = 0, binding = 0) uniform texture2D uSrc;\n\
void main() { uniform_like(); }";
        assert_eq!(to_vulkan(src).text, src);
    }
}
