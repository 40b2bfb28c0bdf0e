use std::io::{Error, ErrorKind, Read};
use byteorder::ReadBytesExt;
use paste::paste;

/// Big-endian binary form of a class-file structure.
///
/// `PREFIX` is the width in bytes of the length prefix written in front of a
/// `Vec<T>`; scalars ignore it.
pub trait JParse {

    type Output;

    fn from_bytes<R: Read>(r: R) -> Result<Self::Output, Error> {
        Self::from_bytes_prefixed::<R, 2>(r)
    }

    fn from_bytes_prefixed<R: Read, const PREFIX: usize>(r: R) -> Result<Self::Output, Error>;

    fn to_bytes(&self) -> Vec<u8> {
        self.to_bytes_prefixed::<2>()
    }

    fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8>;

}

macro_rules! impl_jparse {

    ($name:tt) => {

        paste! {

            impl JParse for $name {

                type Output = $name;

                fn from_bytes_prefixed<R: std::io::Read, const PREFIX: usize>(mut r: R) -> Result<Self::Output, std::io::Error> {
                    use byteorder::BigEndian;
                    r. [< read_ $name >]::<BigEndian>()
                }

                fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
                    self.to_be_bytes().into()
                }

            }

        }


    }

}

impl_jparse!(u16);
impl_jparse!(i16);
impl_jparse!(u32);
impl_jparse!(i32);
impl_jparse!(u64);
impl_jparse!(i64);
impl_jparse!(f32);
impl_jparse!(f64);

impl JParse for u8 {
    type Output = u8;

    fn from_bytes_prefixed<R: Read, const PREFIX: usize>(mut r: R) -> Result<u8, Error> {
        r.read_u8()
    }

    fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
        vec![*self]
    }
}

impl JParse for i8 {
    type Output = i8;

    fn from_bytes_prefixed<R: Read, const PREFIX: usize>(mut r: R) -> Result<i8, Error> {
        r.read_i8()
    }

    fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl<T> JParse for Vec<T> where T: JParse<Output = T> {
    type Output = Vec<T>;

    fn from_bytes_prefixed<R: Read, const PREFIX: usize>(mut r: R) -> Result<Vec<T>, Error> {
        if PREFIX == 0 || PREFIX > 8 {
            return Err(Error::new(ErrorKind::InvalidInput, "vector length prefix must be 1 to 8 bytes"));
        }

        let mut buf = [0; 8];
        r.read_exact(&mut buf[8 - PREFIX..8])?;

        let length = u64::from_be_bytes(buf);

        let mut out = Vec::new();

        for _ in 0..length {
            out.push(T::from_bytes_prefixed::<_, 0>(&mut r)?)
        }

        Ok(out)
    }

    fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
        // the derive only accepts widths of 1 to 8
        let width = PREFIX.clamp(1, 8);
        let mut out = Vec::new();

        let length = (self.len() as u64).to_be_bytes();

        out.extend(&length[8 - width..8]);

        for item in self {
            out.extend(item.to_bytes_prefixed::<0>())
        }

        out
    }

}
