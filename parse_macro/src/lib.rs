use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Expr, ExprLit, Fields, ItemStruct, Lit, Meta};

/// Derives `romizer_types::JParse` field by field, in declaration order.
///
/// `#[prefix = N]` on a vector field sets the width of its length prefix in
/// bytes, 1 to 8; the default is 2.
#[proc_macro_derive(JParse, attributes(prefix))]
pub fn jparse_derive(stream: TokenStream) -> TokenStream {
    let item: ItemStruct = parse_macro_input!(stream);

    expand(&item).unwrap_or_else(syn::Error::into_compile_error).into()
}

fn expand(item: &ItemStruct) -> syn::Result<TokenStream2> {
    let Fields::Named(fields) = &item.fields else {
        return Err(syn::Error::new_spanned(&item.ident, "JParse needs a struct with named fields"));
    };

    let ident = &item.ident;
    let (impl_generics, type_generics, where_clause) = item.generics.split_for_impl();

    let mut to_bytes = TokenStream2::new();
    let mut from_bytes = TokenStream2::new();

    for field in &fields.named {
        let name = &field.ident;
        let ty = &field.ty;
        let prefix = prefix(&field.attrs)?;

        to_bytes.extend(quote! {
            out.extend(romizer_types::JParse::to_bytes_prefixed::<#prefix>(&self.#name));
        });

        from_bytes.extend(quote! {
            #name: <#ty as romizer_types::JParse>::from_bytes_prefixed::<&mut R, #prefix>(&mut r)?,
        });
    }

    Ok(quote! {
        impl #impl_generics romizer_types::JParse for #ident #type_generics #where_clause {
            type Output = Self;

            fn from_bytes_prefixed<R: std::io::Read, const PREFIX: usize>(mut r: R) -> Result<Self, std::io::Error> {
                Ok(Self { #from_bytes })
            }

            fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
                let mut out = Vec::new();
                #to_bytes
                out
            }
        }
    })
}

/// Width named by a `#[prefix = N]` attribute, or 2.
fn prefix(attrs: &[Attribute]) -> syn::Result<usize> {
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("prefix")) {
        let Meta::NameValue(meta) = &attr.meta else {
            return Err(syn::Error::new_spanned(attr, "expected `#[prefix = N]`"));
        };

        let Expr::Lit(ExprLit { lit: Lit::Int(width), .. }) = &meta.value else {
            return Err(syn::Error::new_spanned(&meta.value, "prefix width must be an integer"));
        };

        let width: usize = width.base10_parse()?;
        if !(1..=8).contains(&width) {
            return Err(syn::Error::new_spanned(&meta.value, "prefix width must be 1 to 8 bytes"));
        }

        return Ok(width);
    }

    Ok(2)
}
