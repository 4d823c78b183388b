//! Macros for the [`docsession`](../docsession/index.html) package.

use std::collections::BTreeSet;
use std::path::PathBuf;

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{LitStr, Token};

/// A macro that expands a function taking a single `&str` path into one
/// `#[test]` per document matched by one or more
/// [`glob`](../glob/index.html) patterns at compile time.
///
/// Patterns are resolved relative to the crate root. The name of each
/// generated test is the name of the annotated function followed by the
/// path of the document below the fixed part of its pattern, with every
/// character that is not alphanumeric replaced by `_`.
///
/// # Example
///
/// Assume that your cargo project has a `docs` folder with the following
/// structure:
///
/// - `guide`
///    - `intro.rst`
///    - `async.md`
///
/// Then the expansion
///
/// ```ignore
/// use docsession_macros::doc_test;
///
/// #[doc_test("docs/**/*.rst", "docs/**/*.md")]
/// fn test_docs(path: &str) {
///     docsession::run_file(path, &Default::default()).unwrap();
/// }
/// ```
///
/// will be
///
/// ```ignore
/// fn test_docs(path: &str) {
///     docsession::run_file(path, &Default::default()).unwrap();
/// }
///
/// #[test]
/// fn test_docs_guide_async_md() {
///     test_docs("/path/to/crate/docs/guide/async.md")
/// }
///
/// #[test]
/// fn test_docs_guide_intro_rst() {
///     test_docs("/path/to/crate/docs/guide/intro.rst")
/// }
/// ```
#[proc_macro_attribute]
pub fn doc_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let patterns = match Punctuated::<LitStr, Token![,]>::parse_terminated.parse(attr) {
        Ok(patterns) if !patterns.is_empty() => patterns,
        _ => {
            let msg = "doc_test: needs one or more glob pattern literal string parameters";
            let err = syn::Error::new(Span::call_site(), msg);
            return err.to_compile_error().into();
        }
    };

    let Ok(syn::ItemFn {
        attrs,
        vis,
        sig,
        block,
    }) = syn::parse(item)
    else {
        let msg = "doc_test: attribute can only annotate a function";
        let err = syn::Error::new(Span::call_site(), msg);
        return err.to_compile_error().into();
    };

    if let Err(err) = check_signature(&sig) {
        return err.to_compile_error().into();
    };

    // Paths matched by several patterns produce a single test.
    let mut suffixes = BTreeSet::new();
    let mut tests = Vec::new();
    for pattern in &patterns {
        let paths = match resolve(pattern) {
            Ok(paths) => paths,
            Err(err) => return err.to_compile_error().into(),
        };
        for (suffix, path) in paths {
            if suffixes.insert(suffix.clone()) {
                tests.push((suffix, path));
            }
        }
    }

    let fn_name = &sig.ident;
    let test_fns = tests.iter().map(|(suffix, path)| {
        let test_name = syn::Ident::new(&format!("{fn_name}_{suffix}"), sig.ident.span());
        let test_sig = syn::Signature {
            ident: test_name,
            inputs: Punctuated::new(),
            output: syn::ReturnType::Default,
            ..sig.clone()
        };
        quote! {
            #(#attrs)* #[test] #vis #test_sig {
                #fn_name(#path)
            }
        }
    });

    let expanded = quote! {
        #(#attrs)* #vis #sig #block

        #(#test_fns)*
    };
    expanded.into()
}

/// Resolve `pattern` to pairs of test name suffix and path.
fn resolve(pattern: &LitStr) -> Result<Vec<(String, String)>, syn::Error> {
    let resolved = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(root) => PathBuf::from(root).join(pattern.value()),
        Err(_) => PathBuf::from(pattern.value()),
    };
    let Some(resolved) = resolved.to_str() else {
        let msg = "doc_test: pattern resolves to a non-utf8 path";
        return Err(syn::Error::new(pattern.span(), msg));
    };

    let Ok(paths) = glob::glob(resolved) else {
        let msg = "doc_test: argument is not a valid glob pattern";
        return Err(syn::Error::new(pattern.span(), msg));
    };

    let const_prefix_len = resolved
        .find(['*', '?', '['])
        .and_then(|i| resolved[..i].rfind('/').map(|slash| slash + 1))
        .unwrap_or(0);
    let mut found = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| syn::Error::new(pattern.span(), err))?;
        let Some(path) = path.to_str() else {
            let msg = "doc_test: pattern matches a non-utf8 path";
            return Err(syn::Error::new(pattern.span(), msg));
        };
        let suffix = path
            .get(const_prefix_len..)
            .unwrap_or(path)
            .replace(|c: char| !c.is_ascii_alphanumeric(), "_");
        found.push((suffix, path.to_string()));
    }

    if found.is_empty() {
        let msg = format!("doc_test: resolved pattern `{resolved}` didn't match any paths");
        return Err(syn::Error::new(pattern.span(), msg));
    }
    Ok(found)
}

fn check_signature(sig: &syn::Signature) -> Result<(), syn::Error> {
    let mut inputs = sig.inputs.iter();
    let (Some(fn_arg), None) = (inputs.next(), inputs.next()) else {
        let span = sig.inputs.iter().nth(1).map_or(sig.ident.span(), |arg| arg.span());
        let msg = "doc_test: annotated function must have exactly one parameter";
        return Err(syn::Error::new(span, msg));
    };

    match fn_arg {
        syn::FnArg::Typed(syn::PatType { attrs, pat, ty, .. }) => {
            if !attrs.is_empty() {
                let msg = "doc_test: function parameter cannot have attributes";
                return Err(syn::Error::new(fn_arg.span(), msg));
            }
            if !is_str(ty) {
                let msg = "doc_test: function parameter type must be `&str`";
                return Err(syn::Error::new(fn_arg.span(), msg));
            }
            match pat.as_ref() {
                syn::Pat::Ident(syn::PatIdent {
                    attrs,
                    by_ref: None,
                    mutability: None,
                    subpat: None,
                    ..
                }) if attrs.is_empty() => Ok(()),
                _ => {
                    let msg = "doc_test: function parameter must bind a variable";
                    Err(syn::Error::new(fn_arg.span(), msg))
                }
            }
        }
        syn::FnArg::Receiver(_) => {
            let msg = "doc_test: function parameter must not be `self`";
            Err(syn::Error::new(fn_arg.span(), msg))
        }
    }
}

fn is_str(ty: &syn::Type) -> bool {
    let syn::Type::Reference(syn::TypeReference {
        lifetime: None,
        mutability: None,
        elem,
        ..
    }) = ty
    else {
        return false;
    };
    match elem.as_ref() {
        syn::Type::Path(syn::TypePath {
            qself: None,
            path: syn::Path {
                leading_colon: None,
                segments,
            },
        }) if segments.len() == 1 => matches!(
            segments.last(),
            Some(syn::PathSegment {
                ident,
                arguments: syn::PathArguments::None,
            }) if ident == "str"
        ),
        _ => false,
    }
}
