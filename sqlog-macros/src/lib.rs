use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

/// `#[derive(Row)]`: implements `sqlog::row::Row` for a struct by mapping
/// each named field, in declaration order, to a `RowColumn` based on its
/// type. Recognised field types: the signed/unsigned integers up to 64
/// bits, `f32`/`f64`, `String`/`&str`, `Vec<u8>`, and `Option<T>` of any of
/// the above (encoded as `RowColumn::Null` when `None`).
#[proc_macro_derive(Row)]
pub fn derive_row(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    row_impl(input).into()
}

fn row_impl(input: DeriveInput) -> proc_macro2::TokenStream {
    let ident = input.ident;
    let Data::Struct(struct_) = input.data else {
        panic!("Row can only be derived for structs");
    };
    let Fields::Named(fields) = struct_.fields else {
        panic!("Row can only be derived for structs with named fields");
    };

    let column_exprs: Vec<proc_macro2::TokenStream> = fields
        .named
        .iter()
        .map(|field| {
            let field_ident = field.ident.as_ref().expect("named field");
            column_expr(&field.ty, quote!(self.#field_ident))
        })
        .collect();

    quote! {
        impl ::sqlog::row::Row for #ident {
            fn column_values(&self) -> ::std::vec::Vec<::sqlog::row::RowColumn> {
                ::std::vec![#(#column_exprs),*]
            }
        }
    }
}

/// Builds the `RowColumn` constructor expression for one field's type,
/// given an expression `value` that evaluates to that field's value.
fn column_expr(ty: &Type, value: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    if let Some(inner) = option_inner_type(ty) {
        let some_expr = column_expr(inner, quote!(inner));
        return quote! {
            match &#value {
                ::std::option::Option::Some(inner) => #some_expr,
                ::std::option::Option::None => ::sqlog::row::RowColumn::Null,
            }
        };
    }

    match type_name(ty).as_deref() {
        Some("i8") => quote!(::sqlog::row::RowColumn::from_i8(#value as i8)),
        Some("i16") | Some("u8") => quote!(::sqlog::row::RowColumn::from_i16(#value as i16)),
        Some("i32") | Some("u16") => quote!(::sqlog::row::RowColumn::from_i32(#value as i32)),
        Some("i64") | Some("u32") | Some("isize") | Some("usize") => {
            quote!(::sqlog::row::RowColumn::from_i64(#value as i64))
        }
        Some("u64") => quote!(::sqlog::row::RowColumn::from_i64(#value as i64)),
        Some("f32") => quote!(::sqlog::row::RowColumn::from_f64(#value as f64)),
        Some("f64") => quote!(::sqlog::row::RowColumn::from_f64(#value)),
        Some("String") => quote!(::sqlog::row::RowColumn::Text(#value.clone())),
        Some("str") => quote!(::sqlog::row::RowColumn::Text(#value.to_string())),
        Some("Vec") => quote!(::sqlog::row::RowColumn::Blob(#value.clone())),
        _ => quote!(::sqlog::row::RowColumn::Text(::std::format!("{:?}", #value))),
    }
}

/// The bare identifier of a (possibly path-qualified) type, e.g. `u64` for
/// `u64`, `String` for `std::string::String`, `Vec` for `Vec<u8>`.
fn type_name(ty: &Type) -> Option<String> {
    let Type::Path(path) = ty else {
        return None;
    };
    path.path.segments.last().map(|seg| seg.ident.to_string())
}

/// If `ty` is `Option<T>`, returns `T`.
fn option_inner_type(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(t) => Some(t),
        _ => None,
    })
}
