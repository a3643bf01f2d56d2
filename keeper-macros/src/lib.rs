//! Proc macros for keeper oracle tools.
//!
//! Provides `#[derive(Tool)]`, which implements
//! `keeper_core::oracle::ToolDefinition` for a struct of named fields:
//! the tool description comes from the struct's doc comment and the JSON
//! input schema from its fields.
//!
//! # Example
//!
//! ```ignore
//! /// Roll dice for hit, dodge and damage checks
//! #[derive(Tool, Deserialize)]
//! #[tool(name = "roll_dice")]
//! struct RollDice {
//!     /// Dice notation like "1d100" or "2d6+3"
//!     notation: String,
//!     /// What the roll is for
//!     purpose: Option<String>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, Expr, Field, GenericArgument, Lit, Meta, PathArguments, Type};

/// Derive `ToolDefinition`.
///
/// # Attributes
///
/// - `#[tool(name = "...")]` on the struct - tool name (defaults to the snake_case struct name)
/// - `#[tool(optional)]` on a field - leave it out of `required` even if it is not an `Option`
#[proc_macro_derive(Tool, attributes(tool))]
pub fn derive_tool(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let name = tool_name(&input)?;
    let description = doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Tool can only be derived for structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(&input, "Tool can only be derived for structs")),
    };

    let mut properties = Vec::new();
    let mut required = Vec::new();

    for field in fields {
        let field_name = match &field.ident {
            Some(ident) => ident.to_string(),
            None => continue,
        };
        let schema = schema_for(&field.ty);
        let doc = doc_comment(&field.attrs);
        let describe = if doc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::Value::from(#doc); }
        };

        properties.push(quote! {
            {
                let mut property = #schema;
                #describe
                properties.insert(#field_name.to_string(), property);
            }
        });

        if !is_option(&field.ty) && !marked_optional(field)? {
            required.push(field_name);
        }
    }

    Ok(quote! {
        impl ::keeper_core::oracle::ToolDefinition for #ident {
            fn tool_name() -> &'static str {
                #name
            }

            fn tool_description() -> &'static str {
                #description
            }

            fn input_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#properties)*
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": [#(#required),*]
                })
            }
        }
    })
}

fn tool_name(input: &DeriveInput) -> syn::Result<String> {
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("tool")) {
        if let Meta::NameValue(nv) = attr.parse_args::<Meta>()? {
            if nv.path.is_ident("name") {
                if let Expr::Lit(lit) = &nv.value {
                    if let Lit::Str(s) = &lit.lit {
                        return Ok(s.value());
                    }
                }
                return Err(syn::Error::new_spanned(&nv.value, "tool name must be a string literal"));
            }
        }
    }
    Ok(snake_case(&input.ident.to_string()))
}

fn marked_optional(field: &Field) -> syn::Result<bool> {
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("tool")) {
        if let Meta::Path(path) = attr.parse_args::<Meta>()? {
            if path.is_ident("optional") {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn doc_comment(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(lit) => match &lit.lit {
                    Lit::Str(s) => Some(s.value().trim().to_string()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The single generic argument of `Option<T>` / `Vec<T>`.
fn inner_type(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else { return None };
    let segment = path.path.segments.last()?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else { return None };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn last_ident(ty: &Type) -> Option<String> {
    let Type::Path(path) = ty else { return None };
    path.path.segments.last().map(|s| s.ident.to_string())
}

fn is_option(ty: &Type) -> bool {
    last_ident(ty).as_deref() == Some("Option")
}

fn schema_for(ty: &Type) -> TokenStream2 {
    match last_ident(ty).as_deref() {
        Some("String") | Some("str") => quote! { serde_json::json!({"type": "string"}) },
        Some("i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize") => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        Some("f32" | "f64") => quote! { serde_json::json!({"type": "number"}) },
        Some("bool") => quote! { serde_json::json!({"type": "boolean"}) },
        Some("Option") => match inner_type(ty) {
            Some(inner) => schema_for(inner),
            None => quote! { serde_json::json!({}) },
        },
        Some("Vec") => match inner_type(ty) {
            Some(inner) => {
                let items = schema_for(inner);
                quote! { serde_json::json!({"type": "array", "items": #items}) }
            }
            None => quote! { serde_json::json!({"type": "array"}) },
        },
        Some(_) => quote! { serde_json::json!({"type": "object"}) },
        None => quote! { serde_json::json!({}) },
    }
}

fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
