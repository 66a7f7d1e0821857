use std::io::{Read, Write};
use std::path::Path;

use npyz::{NpyFile, Order, TypeChar, WriterBuilder};

use crate::{
    DType, Device, InvariantError, Shape, Storage, StorageView, Strides, Tensor, TensorDType,
    TensorError,
};

fn dtype_of(dtype: &npyz::DType) -> Result<DType, TensorError> {
    let npyz::DType::Plain(ts) = dtype else {
        return Err(TensorError::Npy(format!("unsupported record dtype {:?}", dtype)));
    };
    let dt = match (ts.type_char(), ts.size_field()) {
        (TypeChar::Int, 1) => DType::I8,
        (TypeChar::Int, 2) => DType::I16,
        (TypeChar::Int, 4) => DType::I32,
        (TypeChar::Int, 8) => DType::I64,
        (TypeChar::Uint, 1) => DType::U8,
        (TypeChar::Uint, 2) => DType::U16,
        (TypeChar::Uint, 4) => DType::U32,
        (TypeChar::Uint, 8) => DType::U64,
        (TypeChar::Float, 4) => DType::F32,
        (TypeChar::Float, 8) => DType::F64,
        _ => return Err(TensorError::Npy(format!("unsupported dtype {}", ts))),
    };
    Ok(dt)
}

fn read_typed<T, R>(npy: NpyFile<R>, shape: Shape, order: Order) -> Result<Tensor, TensorError>
where
    T: TensorDType + npyz::Deserialize,
    R: Read,
{
    let data = npy.into_vec::<T>()?;
    let strides = match order {
        Order::C => Strides::from(&shape),
        Order::Fortran => Strides::fortran(&shape),
    };
    if data.len() != shape.numel() {
        return Err(TensorError::Npy(format!(
            "expected {} elements for {:?}, found {}",
            shape.numel(),
            shape,
            data.len()
        )));
    }
    let view = StorageView::new(shape, T::dt(), strides, 0);
    Ok(Tensor::from_parts(
        view,
        Storage::from_vec(data, &Device::CPU)?,
        Device::CPU,
    ))
}

/// Reading and writing `.npy` files.
impl Tensor {
    /// Loads a host tensor. Fortran-ordered files keep their column-major strides.
    pub fn read_npy<R: Read>(reader: R) -> Result<Tensor, TensorError> {
        let npy = NpyFile::new(reader)?;
        let shape = npy.shape().iter().map(|&d| d as usize).collect::<Vec<_>>();
        let shape = Shape::from(shape);
        let order = npy.order();
        let dt = dtype_of(&npy.dtype())?;
        log::debug!("Reading npy {:?} {} ({:?} order)", shape, dt, order);
        match dt {
            DType::I8 => read_typed::<i8, R>(npy, shape, order),
            DType::I16 => read_typed::<i16, R>(npy, shape, order),
            DType::I32 => read_typed::<i32, R>(npy, shape, order),
            DType::I64 => read_typed::<i64, R>(npy, shape, order),
            DType::U8 => read_typed::<u8, R>(npy, shape, order),
            DType::U16 => read_typed::<u16, R>(npy, shape, order),
            DType::U32 => read_typed::<u32, R>(npy, shape, order),
            DType::U64 => read_typed::<u64, R>(npy, shape, order),
            DType::F32 => read_typed::<f32, R>(npy, shape, order),
            DType::F64 => read_typed::<f64, R>(npy, shape, order),
            other => Err(InvariantError::UnsupportedDType(other))?,
        }
    }

    pub fn read_npy_file<P: AsRef<Path>>(path: P) -> Result<Tensor, TensorError> {
        let file = std::fs::File::open(path)?;
        Self::read_npy(std::io::BufReader::new(file))
    }

    /// Writes the elements in logical (C) order.
    pub fn write_npy<W: Write>(&self, writer: W) -> Result<(), TensorError> {
        match self.dt() {
            DType::I8 => self.write_typed::<i8, W>(writer),
            DType::I16 => self.write_typed::<i16, W>(writer),
            DType::I32 => self.write_typed::<i32, W>(writer),
            DType::I64 => self.write_typed::<i64, W>(writer),
            DType::U8 => self.write_typed::<u8, W>(writer),
            DType::U16 => self.write_typed::<u16, W>(writer),
            DType::U32 => self.write_typed::<u32, W>(writer),
            DType::U64 => self.write_typed::<u64, W>(writer),
            DType::F32 => self.write_typed::<f32, W>(writer),
            DType::F64 => self.write_typed::<f64, W>(writer),
            other => Err(InvariantError::UnsupportedDType(other))?,
        }
    }

    pub fn write_npy_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TensorError> {
        let file = std::fs::File::create(path)?;
        self.write_npy(std::io::BufWriter::new(file))
    }

    fn write_typed<T, W>(&self, writer: W) -> Result<(), TensorError>
    where
        T: TensorDType + npyz::AutoSerialize,
        W: Write,
    {
        let data = self.to_vec::<T>()?;
        let shape = self.shape().iter().map(|&d| d as u64).collect::<Vec<_>>();
        let mut npy = npyz::WriteOptions::new()
            .default_dtype()
            .shape(&shape)
            .writer(writer)
            .begin_nd()?;
        for value in &data {
            npy.push(value)?;
        }
        npy.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;

    /// A version 1.0 `.npy` image with a space-padded header.
    fn npy_bytes(descr: &str, fortran: bool, shape: &str, data: &[u8]) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}",
            descr,
            if fortran { "True" } else { "False" },
            shape
        );
        let unpadded = 10 + header.len() + 1;
        header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
        header.push('\n');

        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn write_then_read() {
        let t = Tensor::from_data([1.5f32, 2.5, 3.5, 4.5, 5.5, 6.5], shape![2, 3], &Device::CPU)
            .unwrap();
        let tt = t.transpose(0, 1).unwrap();
        let mut bytes = vec![];
        tt.write_npy(&mut bytes).unwrap();

        let back = Tensor::read_npy(&bytes[..]).unwrap();
        assert_eq!(back.shape(), &shape![3, 2]);
        assert_eq!(back.dt(), DType::F32);
        assert_eq!(
            back.to_vec::<f32>().unwrap(),
            tt.to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn fortran_order_is_column_major() {
        let data = [1i32, 4, 2, 5, 3, 6]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<_>>();
        let bytes = npy_bytes("<i4", true, "(2, 3)", &data);
        let t = Tensor::read_npy(&bytes[..]).unwrap();
        assert_eq!(t.strides().to_vec(), vec![1, 2]);
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.npy");
        let t = Tensor::arange(0u16, 6, 1, &Device::CPU)
            .unwrap()
            .reshape(shape![3, 2])
            .unwrap();
        t.write_npy_file(&path).unwrap();
        let back = Tensor::read_npy_file(&path).unwrap();
        assert_eq!(back.dt(), DType::U16);
        assert_eq!(back.to_vec::<u16>().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn unsupported_dtypes() {
        let t = Tensor::from_data([true, false], shape![2], &Device::CPU).unwrap();
        assert!(t.write_npy(&mut vec![]).is_err());
        let bytes = npy_bytes("<c8", false, "(1,)", &[0; 8]);
        assert!(matches!(
            Tensor::read_npy(&bytes[..]),
            Err(TensorError::Npy(_))
        ));
    }
}
